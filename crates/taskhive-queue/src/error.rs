//! Queue errors.

use std::time::Duration;

use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// Failures of the shared store backing the queue.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not open or reach the store.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A store command failed.
    #[error("Store query error: {0}")]
    Query(String),
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::ConnectionClosed => StoreError::Connection(e.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Store failure, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Job rejected at enqueue time.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// The job is not in a state that allows the requested transition.
    #[error("Job {id} is {status}, cannot {action}")]
    InvalidTransition {
        id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    /// The worker's lease on a job was reaped before it reported an outcome.
    #[error("Lease expired for job {0}")]
    LeaseExpired(JobId),

    /// Job record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Worker pool was started twice.
    #[error("Worker pool is already running")]
    PoolAlreadyRunning,
}

/// Errors produced while executing a job handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// No handler registered for the job type. Never retried.
    #[error("No handler registered for job type '{0}'")]
    NotFound(String),

    /// Handler did not finish before the job deadline.
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// Handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Payload could not be decoded into the handler's input type.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Handler output could not be encoded.
    #[error("Invalid result: {0}")]
    InvalidResult(String),

    /// Handler gave up because its context was cancelled.
    #[error("Job cancelled")]
    Cancelled,

    /// Handler reported a failure.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Create a generic handler failure.
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    /// Whether a retry could help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, HandlerError::NotFound(_))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::Failed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::Failed(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_is_transparent() {
        let err = QueueError::from(StoreError::Query("disk I/O error".to_string()));
        assert_eq!(err.to_string(), "Store query error: disk I/O error");
    }

    #[test]
    fn test_handler_error_retryable() {
        assert!(!HandlerError::NotFound("send_email".to_string()).is_retryable());
        assert!(HandlerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(HandlerError::Panicked("boom".to_string()).is_retryable());
        assert!(HandlerError::failed("smtp down").is_retryable());
    }

    #[test]
    fn test_handler_error_from_str() {
        let err: HandlerError = "connection refused".into();
        assert_eq!(err.to_string(), "connection refused");
    }
}
