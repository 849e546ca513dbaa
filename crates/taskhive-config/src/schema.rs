//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub jobs: JobDefaults,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Shared store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store, lost on exit.
    #[default]
    Memory,
    /// SQLite database file, shareable between processes.
    Sqlite,
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database path for the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Prefix for every key written to the store.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// How long terminal jobs are retained.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            namespace: default_namespace(),
            retention_secs: default_retention_secs(),
        }
    }
}

fn default_namespace() -> String {
    "taskhive".to_string()
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Sleep between empty dequeue attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lease length for claimed jobs. Unset disables crash recovery.
    #[serde(default)]
    pub visibility_timeout_secs: Option<u64>,

    /// How often expired leases are reaped.
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: None,
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reap_interval_ms() -> u64 {
    5000
}

/// Defaults applied to every enqueued job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefaults {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// One of `none`, `linear`, `exponential`.
    #[serde(default = "default_backoff")]
    pub backoff: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub priority: i32,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: default_backoff(),
            timeout_secs: default_timeout_secs(),
            priority: 0,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff() -> String {
    "exponential".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

/// Recurring job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tick resolution.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Recurring job definitions.
    #[serde(default)]
    pub jobs: Vec<CronJobConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: default_tick_ms(),
            jobs: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tick_ms() -> u64 {
    1000
}

/// A recurring job declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobConfig {
    pub id: String,

    pub job_type: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub schedule: ScheduleSpec,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub backoff: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Schedule as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScheduleSpec {
    Interval { every_secs: u64 },
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: String, hour: u32, minute: u32 },
    Monthly { day: u32, hour: u32, minute: u32 },
    Cron { expr: String },
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines on the console.
    #[serde(default)]
    pub json: bool,

    /// Directory for rolling log files.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    /// Resolved log directory, `~/.taskhive/logs` when unset.
    pub fn log_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".taskhive")
                .join("logs")
        })
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
