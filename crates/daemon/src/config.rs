//! Daemon configuration
//!
//! Defaults overridden by `ROLLUP_*` environment variables:
//!
//! | Variable                  | Default                    |
//! |---------------------------|----------------------------|
//! | `ROLLUP_DB_PATH`          | `~/.rollup/rollup.db`      |
//! | `ROLLUP_RPC_HOST`         | `127.0.0.1`                |
//! | `ROLLUP_RPC_PORT`         | `9527`                     |
//! | `ROLLUP_POLL_INTERVAL_MS` | `1000`                     |
//! | `ROLLUP_RESUME_POLICY`    | `auto_resume`              |
//! | `ROLLUP_CONFLICT_RETRIES` | `5`                        |
//! | `ROLLUP_LOG_FORMAT`       | `pretty`                   |

use anyhow::{Context, Result};
use config::{Config, Environment, Map};
use rollup_core::application::ResumePolicy;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "ROLLUP";
const DEFAULT_DB_PATH: &str = "~/.rollup/rollup.db";
const IN_MEMORY_DB: &str = ":memory:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unknown log format: {} (expected pretty or json)", other),
        }
    }
}

/// Raw settings as read from defaults and environment
#[derive(Debug, Deserialize)]
struct RawSettings {
    db_path: String,
    rpc_host: String,
    rpc_port: u16,
    poll_interval_ms: u64,
    resume_policy: String,
    conflict_retries: u32,
    log_format: String,
}

/// Validated daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database_url: String,
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub poll_interval: Duration,
    pub resume_policy: ResumePolicy,
    pub conflict_retries: u32,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(None)
    }

    /// Load with an explicit variable map in place of the process environment
    pub fn from_source(vars: Option<Map<String, String>>) -> Result<Self> {
        let raw: RawSettings = Config::builder()
            .set_default("db_path", DEFAULT_DB_PATH)?
            .set_default("rpc_host", "127.0.0.1")?
            .set_default("rpc_port", 9527)?
            .set_default("poll_interval_ms", 1000)?
            .set_default("resume_policy", "auto_resume")?
            .set_default("conflict_retries", 5)?
            .set_default("log_format", "pretty")?
            .add_source(Environment::with_prefix(ENV_PREFIX).source(vars))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration value")?;

        raw.try_into()
    }

    /// Ensure the directory holding the database file exists
    pub fn prepare_storage(&self) -> Result<()> {
        if self.db_path == IN_MEMORY_DB {
            return Ok(());
        }
        if let Some(parent) = Path::new(&self.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

impl TryFrom<RawSettings> for DaemonConfig {
    type Error = anyhow::Error;

    fn try_from(raw: RawSettings) -> Result<Self> {
        let db_path = shellexpand::tilde(&raw.db_path).into_owned();
        let database_url = if db_path == IN_MEMORY_DB {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}", db_path)
        };

        let resume_policy = ResumePolicy::from_str(&raw.resume_policy)?;
        if raw.poll_interval_ms == 0 {
            anyhow::bail!("ROLLUP_POLL_INTERVAL_MS must be positive");
        }

        Ok(Self {
            database_url,
            db_path,
            rpc_host: raw.rpc_host,
            rpc_port: raw.rpc_port,
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
            resume_policy,
            conflict_retries: raw.conflict_retries.max(1),
            log_format: raw.log_format.parse()?,
        })
    }
}
