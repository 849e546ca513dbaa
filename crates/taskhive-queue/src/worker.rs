//! Job worker: claim, execute, report.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffStrategy;
use crate::context::JobContext;
use crate::error::{HandlerError, QueueError};
use crate::job::{BACKOFF_STRATEGY_KEY, Job};
use crate::queue::Queue;
use crate::registry::{HandlerRegistry, HandlerResult, JobHandler};

/// Called after a job completes, with its elapsed execution time.
pub type SuccessCallback = Arc<dyn Fn(&Job, Duration) + Send + Sync>;

/// Called after a failed attempt, once the job has been retried or failed.
/// The job carries its resulting status.
pub type ErrorCallback = Arc<dyn Fn(&Job, &HandlerError) + Send + Sync>;

/// Optional observers of job outcomes.
#[derive(Clone, Default)]
pub struct WorkerHooks {
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl WorkerHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&Job, Duration) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Job, &HandlerError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    fn success(&self, job: &Job, elapsed: Duration) {
        if let Some(cb) = &self.on_success {
            if std::panic::catch_unwind(AssertUnwindSafe(|| cb(job, elapsed))).is_err() {
                warn!(job_id = %job.id, "Success callback panicked");
            }
        }
    }

    fn error(&self, job: &Job, err: &HandlerError) {
        if let Some(cb) = &self.on_error {
            if std::panic::catch_unwind(AssertUnwindSafe(|| cb(job, err))).is_err() {
                warn!(job_id = %job.id, "Error callback panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHooks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// What happened to a processed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retried,
    Failed,
}

/// Per-worker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub id: usize,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
}

/// A single claim-execute loop.
pub struct Worker {
    id: usize,
    queue: Arc<Queue>,
    registry: Arc<HandlerRegistry>,
    hooks: WorkerHooks,
    poll_interval: Duration,
    running: AtomicBool,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
}

impl Worker {
    /// Create a new worker.
    pub fn new(
        id: usize,
        queue: Arc<Queue>,
        registry: Arc<HandlerRegistry>,
        hooks: WorkerHooks,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            registry,
            hooks,
            poll_interval,
            running: AtomicBool::new(false),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Check if the worker loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::SeqCst)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::SeqCst)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            completed: self.jobs_completed(),
            failed: self.jobs_failed(),
            retried: self.jobs_retried(),
        }
    }

    /// Poll until `token` is cancelled.
    ///
    /// Sleeps `poll_interval` whenever nothing was claimed. A failing job or
    /// store never ends the loop. Cancelling `token` does not reach a running
    /// handler; the current job finishes and the loop exits afterwards.
    pub async fn run(&self, token: CancellationToken) {
        self.running.store(true, Ordering::SeqCst);
        info!(worker_id = self.id, "Worker started");

        while !token.is_cancelled() {
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker_id = self.id, error = %e, "Worker iteration failed"),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(worker_id = self.id, "Worker stopped");
    }

    /// Claim and process at most one job.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, QueueError> {
        match self.queue.dequeue().await? {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute a claimed job and report the outcome to the queue.
    pub async fn process(&self, job: Job) -> Result<JobOutcome, QueueError> {
        debug!(
            worker_id = self.id,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            "Processing job"
        );

        let Some(handler) = self.registry.get(&job.job_type) else {
            let err = HandlerError::NotFound(job.job_type.clone());
            warn!(worker_id = self.id, job_id = %job.id, error = %err, "No handler, failing job");
            let failed = self.queue.fail(job.id, &err.to_string()).await?;
            self.jobs_failed.fetch_add(1, Ordering::SeqCst);
            self.hooks.error(&failed, &err);
            return Ok(JobOutcome::Failed);
        };

        let started = Instant::now();
        let result = execute(handler.as_ref(), &job).await;
        let elapsed = started.elapsed();

        match result {
            Ok(output) => {
                let done = self.queue.complete(job.id, output).await?;
                self.jobs_completed.fetch_add(1, Ordering::SeqCst);
                debug!(
                    worker_id = self.id,
                    job_id = %done.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
                self.hooks.success(&done, elapsed);
                Ok(JobOutcome::Completed)
            }
            Err(err) => self.handle_failure(job, err, elapsed).await,
        }
    }

    async fn handle_failure(
        &self,
        mut job: Job,
        err: HandlerError,
        elapsed: Duration,
    ) -> Result<JobOutcome, QueueError> {
        let message = err.to_string();

        let (state, outcome) = if err.is_retryable() && job.can_retry() {
            job.metadata
                .entry(BACKOFF_STRATEGY_KEY.to_string())
                .or_insert_with(|| BackoffStrategy::default().to_string());
            let next = self.queue.retry(&job, &message).await?;
            self.jobs_retried.fetch_add(1, Ordering::SeqCst);
            warn!(
                worker_id = self.id,
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                max_retries = job.max_retries,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %message,
                "Job attempt failed, retrying"
            );
            (next, JobOutcome::Retried)
        } else {
            let failed = self.queue.fail(job.id, &message).await?;
            self.jobs_failed.fetch_add(1, Ordering::SeqCst);
            error!(
                worker_id = self.id,
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %message,
                "Job failed"
            );
            (failed, JobOutcome::Failed)
        };

        self.hooks.error(&state, &err);
        Ok(outcome)
    }
}

/// Run one attempt under the job deadline, turning panics into errors.
///
/// The attempt token is independent of the worker's shutdown token, so only
/// the deadline cancels a running handler.
async fn execute(handler: &dyn JobHandler, job: &Job) -> HandlerResult {
    let attempt_token = CancellationToken::new();
    let limit = job.timeout();
    let deadline = limit.map(|t| Instant::now() + t);
    let ctx = JobContext::new(job, deadline, attempt_token.clone());

    let call = AssertUnwindSafe(handler.handle(ctx, job)).catch_unwind();
    let outcome = match limit {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                attempt_token.cancel();
                return Err(HandlerError::Timeout(limit));
            }
        },
        None => call.await,
    };
    attempt_token.cancel();

    match outcome {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
