//! Wiring from configuration to the queue, client and scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use taskhive_config::{Config, JobDefaults, StoreBackend, StoreConfig};
use taskhive_queue::{
    BackoffStrategy, ClientConfig, JobConfig, JobSubmitter, MemoryStore, PoolConfig, Queue,
    QueueOptions, SqliteStore, Store,
};
use taskhive_scheduler::{CronJob, Scheduler};

/// Open the configured store backend.
pub(crate) async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("store.path is required for the sqlite backend"))?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let store = SqliteStore::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            info!(path = %path.display(), "Using SQLite store");
            Ok(Arc::new(store))
        }
    }
}

/// Open the store for a one-shot command against an existing queue.
pub(crate) async fn open_shared_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    if config.backend == StoreBackend::Memory {
        warn!("The memory store is private to this process; configure store.backend = \"sqlite\" to inspect a running engine");
    }
    open_store(config).await
}

pub(crate) fn queue_options(config: &Config) -> QueueOptions {
    QueueOptions {
        namespace: config.store.namespace.clone(),
        retention: Duration::from_secs(config.store.retention_secs),
        visibility_timeout: config.workers.visibility_timeout_secs.map(Duration::from_secs),
    }
}

pub(crate) fn client_config(config: &Config) -> ClientConfig {
    ClientConfig {
        queue: queue_options(config),
        pool: PoolConfig {
            workers: config.workers.count,
            poll_interval: Duration::from_millis(config.workers.poll_interval_ms),
            reap_interval: Duration::from_millis(config.workers.reap_interval_ms),
        },
    }
}

/// Job options built from the `[jobs]` section.
pub(crate) fn default_job_config(defaults: &JobDefaults) -> Result<JobConfig> {
    let backoff: BackoffStrategy = defaults
        .backoff
        .parse()
        .map_err(|e: String| anyhow!("jobs.backoff: {}", e))?;
    Ok(JobConfig::default()
        .with_max_retries(defaults.max_retries)
        .with_backoff(backoff)
        .with_timeout(Duration::from_secs(defaults.timeout_secs))
        .with_priority(defaults.priority))
}

/// Build a scheduler holding every configured recurring job.
pub(crate) fn build_scheduler(config: &Config, submitter: Arc<dyn JobSubmitter>) -> Result<Scheduler> {
    let scheduler = Scheduler::new(submitter)
        .with_tick(Duration::from_millis(config.scheduler.tick_ms));
    for entry in &config.scheduler.jobs {
        let job = CronJob::from_config(entry, &config.jobs)?;
        scheduler.register(job)?;
    }
    Ok(scheduler)
}

/// Queue handle for one-shot commands.
pub(crate) async fn open_queue(config: &Config) -> Result<Queue> {
    let store = open_shared_store(&config.store).await?;
    Ok(Queue::new(store, queue_options(config)))
}
