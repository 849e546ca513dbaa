//! Producer-side seam for anything that turns job requests into queued jobs.

use async_trait::async_trait;

use crate::error::QueueError;
use crate::job::{JobConfig, JobId};

/// Submits jobs into the queue.
///
/// Implemented by [`Queue`](crate::Queue) and [`Client`](crate::Client);
/// recurring-job schedulers depend on this trait rather than on either.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Build a job from `config` and enqueue it.
    async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        config: &JobConfig,
    ) -> Result<JobId, QueueError>;
}
