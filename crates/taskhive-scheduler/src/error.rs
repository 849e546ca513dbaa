//! Scheduler errors.

use taskhive_queue::QueueError;
use thiserror::Error;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Schedule can never produce a valid time.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Recurring job definition is malformed.
    #[error("Invalid job definition '{id}': {message}")]
    InvalidJob { id: String, message: String },

    /// No recurring job with this id.
    #[error("Recurring job not found: {0}")]
    JobNotFound(String),

    /// A recurring job with this id is already registered.
    #[error("Recurring job already registered: {0}")]
    DuplicateJob(String),

    /// Enqueue failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
}
