//! Fixed-size pool of workers sharing one queue and registry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::QueueError;
use crate::queue::{JobStats, Queue};
use crate::registry::HandlerRegistry;
use crate::worker::{Worker, WorkerHooks, WorkerStats};

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers.
    pub workers: usize,
    /// Sleep between empty polls.
    pub poll_interval: Duration,
    /// How often expired leases are reaped, when the queue uses leases.
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(1),
            reap_interval: Duration::from_secs(5),
        }
    }
}

struct Running {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Worker pool.
pub struct WorkerPool {
    config: PoolConfig,
    queue: Arc<Queue>,
    workers: Vec<Arc<Worker>>,
    running: Mutex<Option<Running>>,
}

impl WorkerPool {
    /// Create a pool. Workers are created now and started by [`start`](Self::start).
    pub fn new(
        queue: Arc<Queue>,
        registry: Arc<HandlerRegistry>,
        config: PoolConfig,
        hooks: WorkerHooks,
    ) -> Self {
        let workers = (0..config.workers)
            .map(|id| {
                Arc::new(Worker::new(
                    id,
                    queue.clone(),
                    registry.clone(),
                    hooks.clone(),
                    config.poll_interval,
                ))
            })
            .collect();

        Self {
            config,
            queue,
            workers,
            running: Mutex::new(None),
        }
    }

    /// Launch every worker under a child of `parent`.
    ///
    /// Cancelling `parent` stops the workers as well as [`stop`](Self::stop) does.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), QueueError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(QueueError::PoolAlreadyRunning);
        }

        let token = parent.child_token();
        let mut handles: Vec<JoinHandle<()>> = self
            .workers
            .iter()
            .map(|worker| {
                let worker = worker.clone();
                let token = token.clone();
                tokio::spawn(async move { worker.run(token).await })
            })
            .collect();

        if self.queue.options().visibility_timeout.is_some() {
            handles.push(tokio::spawn(reap_loop(
                self.queue.clone(),
                self.config.reap_interval,
                token.clone(),
            )));
        }

        info!(workers = self.workers.len(), "Worker pool started");
        *running = Some(Running { token, handles });
        Ok(())
    }

    /// Signal every worker and wait for them to exit.
    pub async fn stop(&self) {
        let Some(Running { token, handles }) = self.running.lock().take() else {
            return;
        };

        token.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }

    /// Check if pool is running.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue counters.
    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        self.queue.stats().await
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.stats()).collect()
    }
}

async fn reap_loop(queue: Arc<Queue>, every: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = queue.reap_expired_leases().await {
                    error!(error = %e, "Lease reaping failed");
                }
            }
        }
    }
}
