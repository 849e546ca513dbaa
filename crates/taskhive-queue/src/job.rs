//! Job definition, status and enqueue-time options.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backoff::BackoffStrategy;

/// Job identifier. UUIDv7, so ids sort by creation time.
pub type JobId = Uuid;

/// Metadata key carrying the job's backoff strategy across re-enqueues.
pub const BACKOFF_STRATEGY_KEY: &str = "backoff_strategy";

/// Job status.
///
/// `Pending`/`Scheduled` → `Processing` → `Completed` | `Retrying` | `Failed`,
/// with `Retrying` going back to `Pending`. Any non-terminal state other than
/// `Processing` may become `Cancelled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Ready to be claimed.
    #[default]
    Pending,
    /// Waiting for its scheduled time.
    Scheduled,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Failed permanently.
    Failed,
    /// Waiting out a retry backoff.
    Retrying,
    /// Cancelled before it was claimed.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal jobs are never touched again except by store expiry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the job sits in one of the queue's ordered structures.
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Scheduled | JobStatus::Retrying
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enqueue-time options. Consumed once to populate a [`Job`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Maximum number of claims before the job fails permanently.
    pub max_retries: u32,
    pub retry_backoff: BackoffStrategy,
    /// Per-attempt deadline. Zero disables the deadline.
    pub timeout: Duration,
    /// Higher is more urgent.
    pub priority: i32,
    /// Delay before the first attempt.
    pub delay: Duration,
    pub metadata: HashMap<String, String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: BackoffStrategy::Exponential,
            timeout: Duration::from_secs(300),
            priority: 0,
            delay: Duration::ZERO,
            metadata: HashMap::new(),
        }
    }
}

impl JobConfig {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.retry_backoff = strategy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Handler registry key.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Handler-interpreted input.
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub priority: i32,
    pub max_retries: u32,
    /// Number of claims so far.
    pub attempts: u32,
    /// Per-attempt deadline in milliseconds, 0 for none.
    #[serde(default)]
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
    /// Earliest instant the job may be claimed.
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// Last failure message.
    #[serde(default)]
    pub error: Option<String>,
    /// Handler output of the successful attempt.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Job {
    /// Create a job with default options.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::from_config(job_type, payload, &JobConfig::default())
    }

    /// Create a job from enqueue-time options.
    pub fn from_config(
        job_type: impl Into<String>,
        payload: serde_json::Value,
        config: &JobConfig,
    ) -> Self {
        let now = Utc::now();
        let delay = chrono::Duration::from_std(config.delay).unwrap_or(chrono::Duration::MAX);
        let scheduled_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut metadata = config.metadata.clone();
        metadata.insert(
            BACKOFF_STRATEGY_KEY.to_string(),
            config.retry_backoff.to_string(),
        );

        Self {
            id: Uuid::now_v7(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            priority: config.priority,
            max_retries: config.max_retries,
            attempts: 0,
            timeout_ms: u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
            created_at: now,
            scheduled_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
            result: None,
            metadata,
        }
    }

    /// Set job priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set scheduled execution time.
    pub fn with_scheduled_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_at = time;
        self
    }

    /// Set maximum retries.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Per-attempt deadline, `None` when unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Check if the job has retry budget left.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retries
    }

    /// Backoff strategy recorded in metadata, if any.
    pub fn backoff_strategy(&self) -> Option<BackoffStrategy> {
        self.metadata
            .get(BACKOFF_STRATEGY_KEY)
            .and_then(|s| s.parse().ok())
    }

    /// Check if the job's scheduled time has been reached.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }
}
