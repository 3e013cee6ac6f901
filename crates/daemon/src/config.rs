use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use taskpay_core::tasks::DEFAULT_MAX_UPLOAD_BYTES;
use taskpay_core::RejectionPolicy;

#[derive(Debug, Parser)]
#[command(name = "taskpay-daemon", version, about = "Task and reward service")]
pub struct Cli {
    /// TOML file with any of the settings below. Flags given on the command line win.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where the HTTP API will listen, e.g. 127.0.0.1:8787
    #[arg(long)]
    pub listen: Option<String>,

    /// SQLite database file.
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Directory for uploaded proof images.
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Max upload body size in bytes.
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Bearer token for the bootstrap admin account.
    #[arg(long, env = "TASKPAY_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Email of the bootstrap admin account.
    #[arg(long)]
    pub admin_email: Option<String>,

    /// What rejecting a redemption does to its code: release | retain.
    #[arg(long)]
    pub rejection_policy: Option<RejectionPolicy>,

    /// Log filter, e.g. `info` or `taskpay_daemon=debug,tower_http=info`. RUST_LOG wins when set.
    #[arg(long)]
    pub log: Option<String>,
}

/// On-disk settings; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<String>,
    pub db_path: Option<PathBuf>,
    pub upload_dir: Option<PathBuf>,
    pub max_upload_bytes: Option<usize>,
    pub admin_token: Option<String>,
    pub admin_email: Option<String>,
    pub rejection_policy: Option<RejectionPolicy>,
    pub log: Option<String>,
}

impl FileConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&s).with_context(|| format!("parse {}", path.display()))
    }
}

#[derive(Clone)]
pub struct DaemonConfig {
    pub listen: String,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub admin_token: Option<String>,
    pub admin_email: String,
    pub rejection_policy: RejectionPolicy,
    pub log: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".into(),
            db_path: PathBuf::from(".taskpay/taskpay.db"),
            upload_dir: PathBuf::from(".taskpay/uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            admin_token: None,
            admin_email: "admin@localhost".into(),
            rejection_policy: RejectionPolicy::default(),
            log: "info".into(),
        }
    }
}

impl DaemonConfig {
    /// Defaults, then the `--config` file, then explicit flags.
    pub fn resolve(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load_from(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(cli, file))
    }

    pub fn merge(cli: Cli, file: FileConfig) -> Self {
        let d = Self::default();
        Self {
            listen: cli.listen.or(file.listen).unwrap_or(d.listen),
            db_path: cli.db_path.or(file.db_path).unwrap_or(d.db_path),
            upload_dir: cli.upload_dir.or(file.upload_dir).unwrap_or(d.upload_dir),
            max_upload_bytes: cli
                .max_upload_bytes
                .or(file.max_upload_bytes)
                .unwrap_or(d.max_upload_bytes),
            admin_token: cli
                .admin_token
                .or(file.admin_token)
                .filter(|t| !t.trim().is_empty()),
            admin_email: cli.admin_email.or(file.admin_email).unwrap_or(d.admin_email),
            rejection_policy: cli
                .rejection_policy
                .or(file.rejection_policy)
                .unwrap_or(d.rejection_policy),
            log: cli.log.or(file.log).unwrap_or(d.log),
        }
    }
}

// Hand-written so the admin token never reaches the logs.
impl fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("listen", &self.listen)
            .field("db_path", &self.db_path)
            .field("upload_dir", &self.upload_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("admin_email", &self.admin_email)
            .field("rejection_policy", &self.rejection_policy)
            .field("log", &self.log)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("taskpay-daemon").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_file_and_defaults_fill_gaps() {
        let file: FileConfig = toml::from_str(
            r#"
            listen = "0.0.0.0:9000"
            db_path = "/var/lib/taskpay.db"
            rejection_policy = "retain"
            "#,
        )
        .unwrap();
        let cfg = DaemonConfig::merge(cli(&["--listen", "127.0.0.1:1234"]), file);
        assert_eq!(cfg.listen, "127.0.0.1:1234");
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/taskpay.db"));
        assert_eq!(cfg.rejection_policy, RejectionPolicy::Retain);
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn policy_flag_parses() {
        let cfg = DaemonConfig::merge(cli(&["--rejection-policy", "retain"]), FileConfig::default());
        assert_eq!(cfg.rejection_policy, RejectionPolicy::Retain);
        assert!(Cli::try_parse_from(["taskpay-daemon", "--rejection-policy", "maybe"]).is_err());
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("listn = \"x\"").is_err());
    }

    #[test]
    fn debug_hides_admin_token() {
        let cfg = DaemonConfig {
            admin_token: Some("s3cret".into()),
            ..DaemonConfig::default()
        };
        assert!(!format!("{cfg:?}").contains("s3cret"));
    }
}
