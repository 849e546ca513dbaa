//! Store-backed job queue.
//!
//! Layout inside the store, under a namespace prefix:
//!
//! - `{ns}:job:{id}`: the serialized job record,
//! - `{ns}:queue`: ready jobs, scored by [`score`],
//! - `{ns}:delayed`: jobs waiting for their scheduled time, scored by unix millis,
//! - `{ns}:leases`: claimed jobs, scored by lease expiry (only with a visibility timeout),
//! - `{ns}:stats:*`: aggregate counters.
//!
//! A job is claimed by whichever caller removes its ready entry. The store
//! reports that removal to exactly one caller, so a job has at most one active
//! claim at any instant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::calculate_backoff;
use crate::error::QueueError;
use crate::job::{Job, JobConfig, JobId, JobStatus};
use crate::store::{Store, StoreOp};
use crate::submitter::JobSubmitter;

/// Weight of one priority step in seconds of scheduled time.
pub const PRIORITY_WEIGHT: i64 = 1_000_000;

/// Default key prefix.
pub const DEFAULT_NAMESPACE: &str = "taskhive";

/// How long terminal jobs stay readable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum number of entries moved per promotion or reap pass.
const BATCH_LIMIT: usize = 100;

/// Ordering score of a ready job. Lower is claimed first.
///
/// Whole seconds of `scheduled_at` minus `priority * PRIORITY_WEIGHT`: among
/// jobs scheduled close together the higher priority wins, while jobs far
/// apart in time are ordered by time.
pub fn score(scheduled_at: DateTime<Utc>, priority: i32) -> i64 {
    scheduled_at
        .timestamp()
        .saturating_sub(i64::from(priority).saturating_mul(PRIORITY_WEIGHT))
}

/// Queue options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Prefix for every store key.
    pub namespace: String,
    /// TTL of terminal job records. Zero keeps them forever.
    pub retention: Duration,
    /// Lease length for claimed jobs. `None` disables leases.
    pub visibility_timeout: Option<Duration>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            retention: DEFAULT_RETENTION,
            visibility_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
    ready: String,
    delayed: String,
    leases: String,
    total: String,
    pending: String,
    processing: String,
    completed: String,
    failed: String,
    cancelled: String,
    last_processed: String,
}

impl Keys {
    fn new(namespace: &str) -> Self {
        let stat = |name: &str| format!("{namespace}:stats:{name}");
        Self {
            prefix: namespace.to_string(),
            ready: format!("{namespace}:queue"),
            delayed: format!("{namespace}:delayed"),
            leases: format!("{namespace}:leases"),
            total: stat("total"),
            pending: stat("pending"),
            processing: stat("processing"),
            completed: stat("completed"),
            failed: stat("failed"),
            cancelled: stat("cancelled"),
            last_processed: stat("last_processed"),
        }
    }

    fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }
}

/// Aggregate queue counters.
///
/// Read without a snapshot, so concurrent mutations may be partially visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub last_processed: Option<DateTime<Utc>>,
}

fn incr(key: &str, delta: i64) -> StoreOp {
    StoreOp::IncrBy {
        key: key.to_string(),
        delta,
    }
}

fn add(set: &str, member: &JobId, score: i64) -> StoreOp {
    StoreOp::AddMember {
        set: set.to_string(),
        member: member.to_string(),
        score,
    }
}

/// Durable job queue over a shared [`Store`].
///
/// Cheap to share behind an `Arc`; every method is safe to call concurrently
/// from any number of workers and producers.
pub struct Queue {
    store: Arc<dyn Store>,
    keys: Keys,
    options: QueueOptions,
}

impl Queue {
    /// Create a queue over `store`.
    pub fn new(store: Arc<dyn Store>, options: QueueOptions) -> Self {
        Self {
            keys: Keys::new(&options.namespace),
            store,
            options,
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn record(&self, job: &Job, ttl: Option<Duration>) -> Result<StoreOp, QueueError> {
        Ok(StoreOp::Set {
            key: self.keys.job(&job.id),
            value: serde_json::to_vec(job)?,
            ttl,
        })
    }

    /// TTL for terminal records; zero retention keeps them forever.
    fn terminal_ttl(&self) -> Option<Duration> {
        (!self.options.retention.is_zero()).then_some(self.options.retention)
    }

    /// Placement of a queued job: the ready set when due, the delayed set otherwise.
    fn placement(&self, job: &Job, now: DateTime<Utc>) -> StoreOp {
        if job.is_due(now) {
            add(&self.keys.ready, &job.id, score(job.scheduled_at, job.priority))
        } else {
            add(&self.keys.delayed, &job.id, job.scheduled_at.timestamp_millis())
        }
    }

    /// Enqueue a job.
    ///
    /// A nil id is replaced with a fresh one. A job scheduled in the future is
    /// stored as `scheduled` until it comes due.
    pub async fn enqueue(&self, mut job: Job) -> Result<JobId, QueueError> {
        if job.job_type.trim().is_empty() {
            return Err(QueueError::InvalidJob("job type must not be empty".to_string()));
        }
        if job.id.is_nil() {
            job.id = Uuid::now_v7();
        }

        let now = Utc::now();
        job.status = if job.is_due(now) {
            JobStatus::Pending
        } else {
            JobStatus::Scheduled
        };

        let ops = vec![
            self.record(&job, None)?,
            self.placement(&job, now),
            incr(&self.keys.total, 1),
            incr(&self.keys.pending, 1),
        ];
        self.store.execute(ops).await?;

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            status = %job.status,
            "Enqueued job"
        );
        Ok(job.id)
    }

    /// Claim the next ready job.
    ///
    /// Returns `None` when nothing is ready or another caller won the race
    /// for the head entry. The ready set only holds due jobs, so its head is
    /// taken whatever its score; jobs with negative priority stay claimable
    /// even though their score lies in the future.
    ///
    /// If the claim write fails after the head entry was removed, the entry
    /// is put back before the error is returned.
    pub async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        self.promote_due().await?;

        let head = self.store.range_by_score(&self.keys.ready, i64::MAX, 1).await?;
        let Some(head) = head.into_iter().next() else {
            return Ok(None);
        };

        if !self.store.remove_member(&self.keys.ready, &head.member).await? {
            return Ok(None);
        }

        match self.claim(&head.member).await {
            Ok(job) => Ok(job),
            Err(e) => Err(self.restore(&self.keys.ready, &head.member, head.score, e).await),
        }
    }

    /// Mark a removed ready entry as processing.
    async fn claim(&self, member: &str) -> Result<Option<Job>, QueueError> {
        let Some(mut job) = self.load_member(member).await? else {
            warn!(member = %member, "Dropped ready entry without a job record");
            self.store.incr_by(&self.keys.pending, -1).await?;
            return Ok(None);
        };

        let now = Utc::now();
        job.attempts += 1;
        job.status = JobStatus::Processing;
        job.started_at = Some(now);

        let mut ops = vec![
            self.record(&job, None)?,
            incr(&self.keys.pending, -1),
            incr(&self.keys.processing, 1),
        ];
        if let Some(vt) = self.options.visibility_timeout {
            let lease = i64::try_from(vt.as_millis()).unwrap_or(i64::MAX);
            let expiry = now.timestamp_millis().saturating_add(lease);
            ops.push(add(&self.keys.leases, &job.id, expiry));
        }
        self.store.execute(ops).await?;

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            "Claimed job"
        );
        Ok(Some(job))
    }

    /// Move due delayed jobs into the ready set. Returns how many moved.
    pub async fn promote_due(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let due = self
            .store
            .range_by_score(&self.keys.delayed, now.timestamp_millis(), BATCH_LIMIT)
            .await?;

        let mut promoted = 0;
        for entry in due {
            if !self.store.remove_member(&self.keys.delayed, &entry.member).await? {
                continue;
            }
            match self.promote(&entry.member).await {
                Ok(true) => promoted += 1,
                Ok(false) => {}
                Err(e) => {
                    return Err(self.restore(&self.keys.delayed, &entry.member, entry.score, e).await);
                }
            }
        }

        if promoted > 0 {
            debug!(count = promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    /// Place a removed delayed entry into the ready set.
    async fn promote(&self, member: &str) -> Result<bool, QueueError> {
        let Some(mut job) = self.load_member(member).await? else {
            warn!(member = %member, "Dropped delayed entry without a job record");
            return Ok(false);
        };

        job.status = JobStatus::Pending;
        let ops = vec![
            self.record(&job, None)?,
            add(&self.keys.ready, &job.id, score(job.scheduled_at, job.priority)),
        ];
        self.store.execute(ops).await?;
        Ok(true)
    }

    /// Re-add an entry this caller removed when the follow-up failed on the
    /// store. Returns `err` for the caller to propagate.
    ///
    /// Other errors (an unreadable record) leave the entry out so it cannot
    /// block the head of the set.
    async fn restore(&self, set: &str, member: &str, score: i64, err: QueueError) -> QueueError {
        if matches!(err, QueueError::Store(_)) {
            if let Err(e) = self.store.add_member(set, member, score).await {
                error!(set = %set, member = %member, error = %e, "Failed to restore queue entry");
            }
        }
        err
    }

    /// Release the caller's lease. Fails if the lease was already reaped.
    async fn release_lease(&self, id: JobId) -> Result<(), QueueError> {
        if self.options.visibility_timeout.is_none() {
            return Ok(());
        }
        if self.store.remove_member(&self.keys.leases, &id.to_string()).await? {
            Ok(())
        } else {
            Err(QueueError::LeaseExpired(id))
        }
    }

    async fn load_processing(&self, id: JobId, action: &'static str) -> Result<Job, QueueError> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id,
                status: job.status,
                action,
            });
        }
        Ok(job)
    }

    /// Mark a claimed job as completed.
    pub async fn complete(
        &self,
        id: JobId,
        result: Option<serde_json::Value>,
    ) -> Result<Job, QueueError> {
        self.release_lease(id).await?;
        let mut job = self.load_processing(id, "complete").await?;

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.result = result;

        let ops = vec![
            self.record(&job, self.terminal_ttl())?,
            incr(&self.keys.processing, -1),
            incr(&self.keys.completed, 1),
            StoreOp::Set {
                key: self.keys.last_processed.clone(),
                value: now.timestamp_millis().to_string().into_bytes(),
                ttl: None,
            },
        ];
        self.store.execute(ops).await?;

        debug!(job_id = %id, job_type = %job.job_type, "Completed job");
        Ok(job)
    }

    /// Mark a claimed job as permanently failed.
    pub async fn fail(&self, id: JobId, error: &str) -> Result<Job, QueueError> {
        self.release_lease(id).await?;
        let mut job = self.load_processing(id, "fail").await?;

        job.status = JobStatus::Failed;
        job.failed_at = Some(Utc::now());
        job.error = Some(error.to_string());

        let ops = vec![
            self.record(&job, self.terminal_ttl())?,
            incr(&self.keys.processing, -1),
            incr(&self.keys.failed, 1),
        ];
        self.store.execute(ops).await?;

        debug!(job_id = %id, job_type = %job.job_type, error = %error, "Failed job");
        Ok(job)
    }

    /// Put a claimed job back after a failed attempt.
    ///
    /// The next attempt is scheduled `backoff(strategy, attempts)` from now;
    /// metadata changes on `job` are kept.
    pub async fn retry(&self, job: &Job, error: &str) -> Result<Job, QueueError> {
        self.release_lease(job.id).await?;
        let stored = self.load_processing(job.id, "retry").await?;

        let strategy = job.backoff_strategy().unwrap_or_default();
        let delay = calculate_backoff(strategy, stored.attempts);
        let now = Utc::now();

        let mut next = stored;
        next.metadata = job.metadata.clone();
        next.error = Some(error.to_string());
        next.scheduled_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        next.status = if next.is_due(now) {
            JobStatus::Pending
        } else {
            JobStatus::Retrying
        };

        let ops = vec![
            self.record(&next, None)?,
            self.placement(&next, now),
            incr(&self.keys.processing, -1),
            incr(&self.keys.pending, 1),
        ];
        self.store.execute(ops).await?;

        debug!(
            job_id = %next.id,
            job_type = %next.job_type,
            attempt = next.attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduled retry"
        );
        Ok(next)
    }

    /// Cancel a job that has not been claimed yet.
    ///
    /// Returns `false` for jobs that are processing or already finished.
    pub async fn cancel(&self, id: JobId) -> Result<bool, QueueError> {
        let mut job = self.get(id).await?;
        if !job.status.is_queued() {
            return Ok(false);
        }

        let member = id.to_string();
        let removed = self.store.remove_member(&self.keys.ready, &member).await?
            || self.store.remove_member(&self.keys.delayed, &member).await?;
        if !removed {
            return Ok(false);
        }

        job.status = JobStatus::Cancelled;
        let ops = vec![
            self.record(&job, self.terminal_ttl())?,
            incr(&self.keys.pending, -1),
            incr(&self.keys.cancelled, 1),
        ];
        self.store.execute(ops).await?;

        info!(job_id = %id, job_type = %job.job_type, "Cancelled job");
        Ok(true)
    }

    /// Look up a job.
    pub async fn get(&self, id: JobId) -> Result<Job, QueueError> {
        self.load(id).await?.ok_or(QueueError::JobNotFound(id))
    }

    async fn load(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        match self.store.get(&self.keys.job(&id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load_member(&self, member: &str) -> Result<Option<Job>, QueueError> {
        match member.parse::<JobId>() {
            Ok(id) => self.load(id).await,
            Err(_) => Ok(None),
        }
    }

    /// Aggregate counters.
    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        let last_processed = self
            .store
            .get(&self.keys.last_processed)
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(JobStats {
            total: self.counter(&self.keys.total).await?,
            pending: self.counter(&self.keys.pending).await?,
            processing: self.counter(&self.keys.processing).await?,
            completed: self.counter(&self.keys.completed).await?,
            failed: self.counter(&self.keys.failed).await?,
            cancelled: self.counter(&self.keys.cancelled).await?,
            last_processed,
        })
    }

    async fn counter(&self, key: &str) -> Result<u64, QueueError> {
        Ok(self.store.counter(key).await?.max(0) as u64)
    }

    /// Number of jobs ready to be claimed.
    pub async fn ready_len(&self) -> Result<u64, QueueError> {
        Ok(self.store.set_len(&self.keys.ready).await?)
    }

    /// Number of jobs waiting for their scheduled time.
    pub async fn delayed_len(&self) -> Result<u64, QueueError> {
        Ok(self.store.set_len(&self.keys.delayed).await?)
    }

    /// Re-queue claimed jobs whose lease ran out. Returns how many were re-queued.
    ///
    /// A no-op without a visibility timeout.
    pub async fn reap_expired_leases(&self) -> Result<usize, QueueError> {
        if self.options.visibility_timeout.is_none() {
            return Ok(0);
        }

        let now = Utc::now();
        let expired = self
            .store
            .range_by_score(&self.keys.leases, now.timestamp_millis(), BATCH_LIMIT)
            .await?;

        let mut reaped = 0;
        for entry in expired {
            if !self.store.remove_member(&self.keys.leases, &entry.member).await? {
                continue;
            }
            let Some(mut job) = self.load_member(&entry.member).await? else {
                continue;
            };
            if job.status != JobStatus::Processing {
                continue;
            }

            job.status = JobStatus::Pending;
            let ops = vec![
                self.record(&job, None)?,
                add(&self.keys.ready, &job.id, score(job.scheduled_at, job.priority)),
                incr(&self.keys.processing, -1),
                incr(&self.keys.pending, 1),
            ];
            self.store.execute(ops).await?;

            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                "Lease expired, job re-queued"
            );
            reaped += 1;
        }
        Ok(reaped)
    }
}

#[async_trait]
impl JobSubmitter for Queue {
    async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        config: &JobConfig,
    ) -> Result<JobId, QueueError> {
        self.enqueue(Job::from_config(job_type, payload, config)).await
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
