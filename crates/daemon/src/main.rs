use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use taskpay_daemon::config::{Cli, DaemonConfig};
use taskpay_daemon::{build_state, http};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::resolve(Cli::parse())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log))
        .context("invalid log filter")?;
    fmt().with_target(false).with_env_filter(filter).init();

    info!("starting daemon with config: {:?}", config);

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen))?;
    let app = http::router(build_state(config).await?);

    info!("listening on http://{}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
