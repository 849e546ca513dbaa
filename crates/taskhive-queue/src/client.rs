//! Client facade bundling queue, registry and worker pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::job::{Job, JobConfig, JobId};
use crate::pool::{PoolConfig, WorkerPool};
use crate::queue::{JobStats, Queue, QueueOptions};
use crate::registry::HandlerRegistry;
use crate::store::Store;
use crate::submitter::JobSubmitter;
use crate::worker::{WorkerHooks, WorkerStats};

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub queue: QueueOptions,
    pub pool: PoolConfig,
}

impl ClientConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.pool.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.pool.poll_interval = interval;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.queue.namespace = namespace.into();
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.queue.visibility_timeout = Some(timeout);
        self
    }
}

/// Entry point for producers and for running workers.
///
/// Handlers can be registered on [`registry`](Self::registry) at any time;
/// workers look them up per job.
pub struct Client {
    queue: Arc<Queue>,
    registry: Arc<HandlerRegistry>,
    pool: WorkerPool,
}

impl Client {
    pub fn new(store: Arc<dyn Store>, registry: Arc<HandlerRegistry>, config: ClientConfig) -> Self {
        Self::with_hooks(store, registry, config, WorkerHooks::new())
    }

    /// Create a client whose workers report outcomes to `hooks`.
    pub fn with_hooks(
        store: Arc<dyn Store>,
        registry: Arc<HandlerRegistry>,
        config: ClientConfig,
        hooks: WorkerHooks,
    ) -> Self {
        let queue = Arc::new(Queue::new(store, config.queue));
        let pool = WorkerPool::new(queue.clone(), registry.clone(), config.pool, hooks);
        Self {
            queue,
            registry,
            pool,
        }
    }

    /// Start the worker pool.
    pub fn start(&self, token: &CancellationToken) -> Result<(), QueueError> {
        self.pool.start(token)
    }

    /// Stop the worker pool and wait for in-flight jobs.
    pub async fn stop(&self) {
        self.pool.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Enqueue a job.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        config: JobConfig,
    ) -> Result<JobId, QueueError> {
        self.queue
            .enqueue(Job::from_config(job_type, payload, &config))
            .await
    }

    /// Enqueue a job with default options.
    pub async fn enqueue_default(
        &self,
        job_type: &str,
        payload: serde_json::Value,
    ) -> Result<JobId, QueueError> {
        self.enqueue(job_type, payload, JobConfig::default()).await
    }

    pub async fn get(&self, id: JobId) -> Result<Job, QueueError> {
        self.queue.get(id).await
    }

    /// Cancel a job that has not been claimed. Returns whether it was cancelled.
    pub async fn cancel(&self, id: JobId) -> Result<bool, QueueError> {
        self.queue.cancel(id).await
    }

    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        self.pool.stats().await
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.pool.worker_stats()
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }
}

#[async_trait]
impl JobSubmitter for Client {
    async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        config: &JobConfig,
    ) -> Result<JobId, QueueError> {
        self.queue.submit(job_type, payload, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::store::MemoryStore;

    fn client() -> Client {
        Client::new(
            Arc::new(MemoryStore::new()),
            Arc::new(HandlerRegistry::new()),
            ClientConfig::default().with_workers(1),
        )
    }

    #[test]
    fn test_client_config_builders() {
        let config = ClientConfig::default()
            .with_workers(8)
            .with_poll_interval(Duration::from_millis(250))
            .with_namespace("billing")
            .with_visibility_timeout(Duration::from_secs(30));
        assert_eq!(config.pool.workers, 8);
        assert_eq!(config.pool.poll_interval, Duration::from_millis(250));
        assert_eq!(config.queue.namespace, "billing");
        assert_eq!(config.queue.visibility_timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_enqueue_get_cancel() {
        let client = client();
        let id = client
            .enqueue("report", serde_json::json!({"month": 3}), JobConfig::default().with_priority(2))
            .await
            .unwrap();

        let job = client.get(id).await.unwrap();
        assert_eq!(job.job_type, "report");
        assert_eq!(job.priority, 2);
        assert_eq!(job.payload, serde_json::json!({"month": 3}));

        assert!(client.cancel(id).await.unwrap());
        assert_eq!(client.get(id).await.unwrap().status, JobStatus::Cancelled);

        let stats = client.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.cancelled, 1);
    }

    #[tokio::test]
    async fn test_submitter_impl() {
        let client = client();
        let submitter: &dyn JobSubmitter = &client;
        let id = submitter
            .submit("report", serde_json::Value::Null, &JobConfig::default())
            .await
            .unwrap();
        assert_eq!(client.get(id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let client = client();
        let token = CancellationToken::new();
        client.start(&token).unwrap();
        assert!(client.is_running());
        client.stop().await;
        assert!(!client.is_running());
    }
}
