//! Recurring job definitions.

use std::time::Duration;

use taskhive_config::{CronJobConfig, JobDefaults};
use taskhive_queue::{BackoffStrategy, JobConfig};

use crate::error::SchedulerError;
use crate::schedule::Schedule;

/// A named definition that periodically produces ordinary jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct CronJob {
    pub id: String,
    pub schedule: Schedule,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Options applied to every job this definition produces.
    pub config: JobConfig,
    pub enabled: bool,
}

impl CronJob {
    /// Create an enabled definition with default job options.
    pub fn new(
        id: impl Into<String>,
        schedule: Schedule,
        job_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            schedule,
            job_type: job_type.into(),
            payload,
            config: JobConfig::default(),
            enabled: true,
        }
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build a definition from its config-file form, filling unset options
    /// from `defaults`.
    pub fn from_config(entry: &CronJobConfig, defaults: &JobDefaults) -> Result<Self, SchedulerError> {
        let invalid = |message: String| SchedulerError::InvalidJob {
            id: entry.id.clone(),
            message,
        };

        let schedule = Schedule::from_spec(&entry.schedule).map_err(|e| invalid(e.to_string()))?;
        let backoff: BackoffStrategy = entry
            .backoff
            .as_deref()
            .unwrap_or(defaults.backoff.as_str())
            .parse()
            .map_err(invalid)?;

        let config = JobConfig::default()
            .with_priority(entry.priority.unwrap_or(defaults.priority))
            .with_max_retries(entry.max_retries.unwrap_or(defaults.max_retries))
            .with_backoff(backoff)
            .with_timeout(Duration::from_secs(
                entry.timeout_secs.unwrap_or(defaults.timeout_secs),
            ))
            .with_metadata("cron_job_id", entry.id.clone());

        Ok(Self::new(
            entry.id.clone(),
            schedule,
            entry.job_type.clone(),
            entry.payload.clone(),
        )
        .with_config(config)
        .with_enabled(entry.enabled))
    }
}
