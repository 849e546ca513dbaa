//! Configuration validation.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::{Config, ScheduleSpec, StoreBackend};

const BACKOFF_STRATEGIES: [&str; 3] = ["none", "linear", "exponential"];

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn accumulated errors into a single `ConfigError`.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if self.is_valid() {
            return Ok(self.warnings);
        }
        let message = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Invalid(message))
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_store(config, &mut result);
        Self::validate_workers(config, &mut result);
        Self::validate_jobs(config, &mut result);
        Self::validate_scheduler(config, &mut result);

        result
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        if config.store.namespace.is_empty() {
            result.add_error(ValidationError::new(
                "store.namespace",
                "namespace cannot be empty",
            ));
        }

        if config.store.backend == StoreBackend::Sqlite && config.store.path.is_none() {
            result.add_error(ValidationError::new(
                "store.path",
                "sqlite backend requires a database path",
            ));
        }

        if config.store.retention_secs == 0 {
            result.add_warning(ValidationWarning::new(
                "store.retention_secs",
                "retention of 0 keeps terminal jobs forever",
            ));
        }
    }

    fn validate_workers(config: &Config, result: &mut ValidationResult) {
        if config.workers.count == 0 {
            result.add_error(ValidationError::new(
                "workers.count",
                "count must be greater than 0",
            ));
        }

        if config.workers.count > 256 {
            result.add_warning(ValidationWarning::new(
                "workers.count",
                "count is very high (>256), each worker polls the store independently",
            ));
        }

        if config.workers.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "workers.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }

        if config.workers.visibility_timeout_secs == Some(0) {
            result.add_error(ValidationError::new(
                "workers.visibility_timeout_secs",
                "visibility timeout must be greater than 0 when set",
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        Self::validate_backoff("jobs.backoff", &config.jobs.backoff, result);

        if config.jobs.timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "jobs.timeout_secs",
                "timeout_secs must be greater than 0",
            ));
        }
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        if config.scheduler.tick_ms == 0 {
            result.add_error(ValidationError::new(
                "scheduler.tick_ms",
                "tick_ms must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for (i, job) in config.scheduler.jobs.iter().enumerate() {
            let path = format!("scheduler.jobs[{}]", i);

            if job.id.is_empty() {
                result.add_error(ValidationError::new(format!("{}.id", path), "id cannot be empty"));
            } else if !seen.insert(job.id.as_str()) {
                result.add_error(ValidationError::new(
                    format!("{}.id", path),
                    format!("duplicate recurring job id '{}'", job.id),
                ));
            }

            if job.job_type.is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.job_type", path),
                    "job_type cannot be empty",
                ));
            }

            if let Some(ref backoff) = job.backoff {
                Self::validate_backoff(&format!("{}.backoff", path), backoff, result);
            }

            Self::validate_schedule(&format!("{}.schedule", path), &job.schedule, result);
        }
    }

    fn validate_schedule(path: &str, schedule: &ScheduleSpec, result: &mut ValidationResult) {
        let (hour, minute) = match schedule {
            ScheduleSpec::Interval { every_secs } => {
                if *every_secs == 0 {
                    result.add_error(ValidationError::new(path, "interval must be greater than 0"));
                }
                return;
            }
            ScheduleSpec::Cron { expr } => {
                if expr.trim().is_empty() {
                    result.add_error(ValidationError::new(path, "cron expression cannot be empty"));
                }
                return;
            }
            ScheduleSpec::Daily { hour, minute } => (*hour, *minute),
            ScheduleSpec::Weekly { hour, minute, .. } => (*hour, *minute),
            ScheduleSpec::Monthly { day, hour, minute } => {
                if !(1..=31).contains(day) {
                    result.add_error(ValidationError::new(path, "day must be within 1..=31"));
                }
                (*hour, *minute)
            }
        };

        if hour > 23 {
            result.add_error(ValidationError::new(path, "hour must be within 0..=23"));
        }
        if minute > 59 {
            result.add_error(ValidationError::new(path, "minute must be within 0..=59"));
        }
    }

    fn validate_backoff(path: &str, backoff: &str, result: &mut ValidationResult) {
        if !BACKOFF_STRATEGIES.contains(&backoff) {
            result.add_error(ValidationError::new(
                path,
                format!(
                    "unknown backoff '{}', valid values: {:?}",
                    backoff, BACKOFF_STRATEGIES
                ),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
