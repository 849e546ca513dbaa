//! Per-execution context handed to job handlers.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::job::{Job, JobId};

/// Execution context for one attempt of a job.
///
/// The token fires when the attempt's deadline passes. Pool shutdown does not
/// fire it: a running attempt is allowed to finish. Handlers that spawn their
/// own work should watch it.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    job_type: String,
    attempt: u32,
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl JobContext {
    pub fn new(job: &Job, deadline: Option<Instant>, token: CancellationToken) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            attempt: job.attempts,
            deadline,
            token,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// 1-based attempt number of this execution.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the attempt is abandoned.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
