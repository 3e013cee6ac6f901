//! Task-and-reward HTTP daemon: SQLite persistence, bearer sessions, local uploads.

pub mod config;
pub mod db;
pub mod http;
pub mod uploads;

use anyhow::Result;
use tracing::info;

use crate::config::DaemonConfig;
use crate::db::Db;
use crate::http::AppState;
use crate::uploads::FsBlobStore;

/// Opens storage, seeds the bootstrap admin and returns the router state.
pub async fn build_state(config: DaemonConfig) -> Result<AppState> {
    let db = Db::open(&config.db_path)?;
    if let Some(token) = &config.admin_token {
        let admin = db.ensure_admin(&config.admin_email, token).await?;
        info!(account_id = %admin.id, email = %admin.email, "bootstrap admin ready");
    }
    let uploads = FsBlobStore::new(config.upload_dir.clone());
    Ok(AppState::new(db, uploads, config))
}
