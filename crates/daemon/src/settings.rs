//! Daemon settings
//!
//! Defaults overridden by `TASKLANE_*` environment variables, e.g.
//!
//! ```text
//! TASKLANE_DB_PATH=~/.tasklane/jobs.db
//! TASKLANE_QUEUES=default,emails
//! TASKLANE_WORKER_COUNT=4
//! TASKLANE_POLL_INTERVAL_MS=500
//! TASKLANE_LOG_FORMAT=json
//! TASKLANE_LOG_DIR=/var/log/tasklane
//! ```

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tasklane_core::application::worker::constants::*;
use tasklane_core::RunnerConfig;

const DEFAULT_DB_PATH: &str = "~/.tasklane/jobs.db";
const DEFAULT_QUEUE: &str = "default";

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub db_path: String,
    pub max_connections: u32,
    pub queues: Vec<String>,

    pub worker_count: usize,
    pub poll_interval_ms: u64,
    pub base_retry_delay_ms: u64,
    pub stale_threshold_ms: u64,
    pub cleanup_interval_ms: u64,
    pub retention_ms: u64,
    pub store_timeout_ms: u64,
    pub max_attempts: i32,
    pub shutdown_timeout_ms: u64,

    pub log_format: LogFormat,
    pub log_dir: Option<String>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            max_connections: 8,
            queues: vec![DEFAULT_QUEUE.to_string()],
            worker_count: DEFAULT_WORKER_COUNT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            base_retry_delay_ms: DEFAULT_BASE_RETRY_DELAY.as_millis() as u64,
            stale_threshold_ms: DEFAULT_STALE_THRESHOLD.as_millis() as u64,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL.as_millis() as u64,
            retention_ms: DEFAULT_RETENTION.as_millis() as u64,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            shutdown_timeout_ms: 30_000,
            log_format: LogFormat::Pretty,
            log_dir: None,
        }
    }
}

impl DaemonSettings {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        Self::from_env(None)
    }

    /// Load from `vars` instead of the process environment when given
    pub fn from_env(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let source = Environment::with_prefix("TASKLANE")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("queues")
            .source(vars);

        let settings: Self = Config::builder()
            .add_source(source)
            .build()
            .context("failed to read TASKLANE_* settings")?
            .try_deserialize()
            .context("invalid TASKLANE_* settings")?;

        settings.runner_config().validate()?;
        Ok(settings)
    }

    /// Database file with `~` and `$VAR` expanded
    pub fn db_file(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.db_path)
            .with_context(|| format!("cannot expand db path {}", self.db_path))?;
        Ok(PathBuf::from(expanded.into_owned()))
    }

    pub fn database_url(&self) -> Result<String> {
        Ok(format!("sqlite://{}", self.db_file()?.display()))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            worker_count: self.worker_count,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            base_retry_delay: Duration::from_millis(self.base_retry_delay_ms),
            stale_threshold: Duration::from_millis(self.stale_threshold_ms),
            cleanup_interval: Duration::from_millis(self.cleanup_interval_ms),
            retention: Duration::from_millis(self.retention_ms),
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            default_max_attempts: self.max_attempts,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
