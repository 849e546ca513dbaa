//! Tick-driven scheduler feeding recurring jobs into the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskhive_queue::{JobId, JobSubmitter};

use crate::cron_job::CronJob;
use crate::error::SchedulerError;

/// Default tick resolution.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Default)]
struct State {
    jobs: HashMap<String, CronJob>,
    next_run: HashMap<String, DateTime<Utc>>,
}

impl State {
    fn schedule_from(&mut self, id: &str, now: DateTime<Utc>) {
        let next = self.jobs.get(id).and_then(|job| job.schedule.next(now));
        match next {
            Some(at) => {
                self.next_run.insert(id.to_string(), at);
            }
            None => {
                self.next_run.remove(id);
                warn!(cron_job_id = %id, "Schedule has no further occurrences");
            }
        }
    }
}

/// Recurring job scheduler.
///
/// Definitions and their next run times live behind one lock. Due jobs are
/// submitted outside the lock, so a slow store never blocks registration.
pub struct Scheduler {
    submitter: Arc<dyn JobSubmitter>,
    tick: Duration,
    state: Mutex<State>,
}

impl Scheduler {
    /// Create a scheduler submitting through `submitter`.
    pub fn new(submitter: Arc<dyn JobSubmitter>) -> Self {
        Self {
            submitter,
            tick: DEFAULT_TICK,
            state: Mutex::new(State::default()),
        }
    }

    /// Override the tick resolution.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Add a definition. Its first run is computed from now.
    pub fn register(&self, job: CronJob) -> Result<(), SchedulerError> {
        self.register_at(job, Utc::now())
    }

    /// Add a definition, computing its first run from `now`.
    pub fn register_at(&self, job: CronJob, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        job.schedule.validate()?;
        if job.job_type.trim().is_empty() {
            return Err(SchedulerError::InvalidJob {
                id: job.id,
                message: "job type must not be empty".to_string(),
            });
        }

        let mut state = self.state.lock();
        if state.jobs.contains_key(&job.id) {
            return Err(SchedulerError::DuplicateJob(job.id));
        }

        let id = job.id.clone();
        let enabled = job.enabled;
        info!(cron_job_id = %id, job_type = %job.job_type, schedule = %job.schedule, "Registered recurring job");
        state.jobs.insert(id.clone(), job);
        if enabled {
            state.schedule_from(&id, now);
        }
        Ok(())
    }

    /// Remove a definition.
    pub fn unregister(&self, id: &str) -> Result<CronJob, SchedulerError> {
        let mut state = self.state.lock();
        state.next_run.remove(id);
        let job = state
            .jobs
            .remove(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        info!(cron_job_id = %id, "Unregistered recurring job");
        Ok(job)
    }

    /// Resume firing. The next run is computed from now; missed runs are skipped.
    pub fn enable(&self, id: &str) -> Result<(), SchedulerError> {
        self.enable_at(id, Utc::now())
    }

    pub fn enable_at(&self, id: &str, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        job.enabled = true;
        state.schedule_from(id, now);
        debug!(cron_job_id = %id, "Enabled recurring job");
        Ok(())
    }

    /// Stop firing without removing the definition.
    pub fn disable(&self, id: &str) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        job.enabled = false;
        state.next_run.remove(id);
        debug!(cron_job_id = %id, "Disabled recurring job");
        Ok(())
    }

    /// All definitions, sorted by id.
    pub fn list(&self) -> Vec<CronJob> {
        let state = self.state.lock();
        let mut jobs: Vec<CronJob> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub fn get(&self, id: &str) -> Option<CronJob> {
        self.state.lock().jobs.get(id).cloned()
    }

    /// Next firing time; `None` for disabled, exhausted or unknown definitions.
    pub fn next_run(&self, id: &str) -> Option<DateTime<Utc>> {
        self.state.lock().next_run.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().jobs.is_empty()
    }

    /// Run one scheduling pass at the current time.
    pub async fn tick(&self) -> Vec<JobId> {
        self.tick_at(Utc::now()).await
    }

    /// Enqueue every enabled definition due at `now` and schedule its next run.
    ///
    /// A failed enqueue is logged and the definition still moves on to its
    /// next occurrence. Returns the ids of the enqueued jobs.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let due: Vec<CronJob> = {
            let state = self.state.lock();
            let mut due: Vec<CronJob> = state
                .next_run
                .iter()
                .filter(|(_, at)| **at <= now)
                .filter_map(|(id, _)| state.jobs.get(id))
                .filter(|job| job.enabled)
                .cloned()
                .collect();
            due.sort_by(|a, b| a.id.cmp(&b.id));
            due
        };

        let mut enqueued = Vec::with_capacity(due.len());
        for job in due {
            match self
                .submitter
                .submit(&job.job_type, job.payload.clone(), &job.config)
                .await
            {
                Ok(job_id) => {
                    debug!(cron_job_id = %job.id, job_id = %job_id, "Fired recurring job");
                    enqueued.push(job_id);
                }
                Err(e) => {
                    error!(cron_job_id = %job.id, error = %e, "Failed to enqueue recurring job");
                }
            }

            let mut state = self.state.lock();
            if state.jobs.get(&job.id).is_some_and(|j| j.enabled) {
                state.schedule_from(&job.id, now);
            }
        }
        enqueued
    }

    /// Tick until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_ms = self.tick.as_millis() as u64, jobs = self.len(), "Scheduler started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
