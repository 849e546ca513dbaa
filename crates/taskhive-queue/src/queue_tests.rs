use super::*;
use crate::backoff::BackoffStrategy;
use crate::store::MemoryStore;
use crate::error::StoreError;

fn memory_queue() -> Queue {
    Queue::new(Arc::new(MemoryStore::new()), QueueOptions::default())
}

fn leased_queue(vt: Duration) -> Queue {
    Queue::new(
        Arc::new(MemoryStore::new()),
        QueueOptions {
            visibility_timeout: Some(vt),
            ..Default::default()
        },
    )
}

fn job(job_type: &str) -> Job {
    Job::new(job_type, serde_json::Value::Null)
}

#[test]
fn test_score_formula() {
    let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(score(t, 0), t.timestamp());
    assert_eq!(score(t, 2), t.timestamp() - 2 * PRIORITY_WEIGHT);
    assert_eq!(score(t, -1), t.timestamp() + PRIORITY_WEIGHT);

    // Close in time: priority dominates.
    assert!(score(t + chrono::Duration::seconds(30), 1) < score(t, 0));
    // Far apart in time: time dominates.
    assert!(score(t, 0) < score(t + chrono::Duration::days(30), 1));
}

#[tokio::test]
async fn test_enqueue_dequeue() {
    let queue = memory_queue();
    let id = queue.enqueue(job("send_email")).await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(queue.ready_len().await.unwrap(), 1);

    let claimed = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert_eq!(claimed.attempts, 1);
    assert!(claimed.started_at.is_some());

    let stored = queue.get(id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Processing);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 1);
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn test_enqueue_rejects_empty_type() {
    let queue = memory_queue();
    let err = queue.enqueue(job("  ")).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidJob(_)));
    assert_eq!(queue.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_enqueue_assigns_missing_id() {
    let queue = memory_queue();
    let mut nil = job("report");
    nil.id = Uuid::nil();
    let id = queue.enqueue(nil).await.unwrap();
    assert!(!id.is_nil());
    assert_eq!(queue.get(id).await.unwrap().job_type, "report");
}

#[tokio::test]
async fn test_priority_ordering() {
    let queue = memory_queue();
    let at = Utc::now() - chrono::Duration::seconds(1);

    queue.enqueue(job("low").with_scheduled_at(at).with_priority(-1)).await.unwrap();
    queue.enqueue(job("high").with_scheduled_at(at).with_priority(10)).await.unwrap();
    queue.enqueue(job("normal").with_scheduled_at(at)).await.unwrap();

    let order: Vec<String> = [
        queue.dequeue().await.unwrap().unwrap(),
        queue.dequeue().await.unwrap().unwrap(),
        queue.dequeue().await.unwrap().unwrap(),
    ]
    .into_iter()
    .map(|j| j.job_type)
    .collect();
    assert_eq!(order, vec!["high", "normal", "low"]);
}

#[tokio::test]
async fn test_equal_score_is_fifo() {
    let queue = memory_queue();
    let at = Utc::now() - chrono::Duration::seconds(1);

    let first = queue.enqueue(job("a").with_scheduled_at(at)).await.unwrap();
    let second = queue.enqueue(job("b").with_scheduled_at(at)).await.unwrap();

    assert_eq!(queue.dequeue().await.unwrap().unwrap().id, first);
    assert_eq!(queue.dequeue().await.unwrap().unwrap().id, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_single_claim_under_contention() {
    let queue = Arc::new(memory_queue());
    let id = queue.enqueue(job("contested")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move { queue.dequeue().await.unwrap() }));
    }

    let mut claims = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            claims.push(job);
        }
    }
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].id, id);
    assert_eq!(queue.get(id).await.unwrap().attempts, 1);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_single_claim_under_contention() {
    let dir = tempfile::tempdir().unwrap();
    let store = crate::store::SqliteStore::open(dir.path().join("queue.db")).await.unwrap();
    let queue = Arc::new(Queue::new(Arc::new(store), QueueOptions::default()));

    for i in 0..10 {
        queue.enqueue(job(&format!("job-{i}"))).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            for _ in 0..20 {
                if let Some(job) = queue.dequeue().await.unwrap() {
                    mine.push(job.id);
                }
            }
            mine
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: std::collections::HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), unique.len());
    assert_eq!(all.len(), 10);
}

#[tokio::test]
async fn test_delayed_job_waits() {
    let queue = memory_queue();
    let config = JobConfig::default().with_delay(Duration::from_millis(200));
    let id = queue.submit("later", serde_json::Value::Null, &config).await.unwrap();

    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Scheduled);
    assert_eq!(queue.delayed_len().await.unwrap(), 1);
    assert_eq!(queue.stats().await.unwrap().pending, 1);
    assert!(queue.dequeue().await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(250)).await;
    let claimed = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(queue.delayed_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_high_priority_does_not_pull_delayed_job_forward() {
    let queue = memory_queue();
    let config = JobConfig::default()
        .with_priority(100)
        .with_delay(Duration::from_secs(3600));
    queue.submit("future", serde_json::Value::Null, &config).await.unwrap();

    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete() {
    let queue = memory_queue();
    let id = queue.enqueue(job("report")).await.unwrap();
    queue.dequeue().await.unwrap().unwrap();

    let done = queue
        .complete(id, Some(serde_json::json!({"rows": 3})))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.completed_at.is_some());

    let stored = queue.get(id).await.unwrap();
    assert_eq!(stored.result, Some(serde_json::json!({"rows": 3})));

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.completed, 1);
    assert!(stats.last_processed.is_some());
}

#[tokio::test]
async fn test_complete_requires_processing() {
    let queue = memory_queue();
    let id = queue.enqueue(job("report")).await.unwrap();

    let err = queue.complete(id, None).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            status: JobStatus::Pending,
            ..
        }
    ));
}

#[tokio::test]
async fn test_fail_is_terminal() {
    let queue = memory_queue();
    let id = queue.enqueue(job("report")).await.unwrap();
    let claimed = queue.dequeue().await.unwrap().unwrap();

    let failed = queue.fail(id, "smtp down").await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("smtp down"));
    assert!(failed.failed_at.is_some());

    let err = queue.retry(&claimed, "again").await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.processing, 0);
}

#[tokio::test]
async fn test_retry_without_backoff_is_immediately_ready() {
    let queue = memory_queue();
    let config = JobConfig::default().with_backoff(BackoffStrategy::None);
    let id = queue.submit("flaky", serde_json::Value::Null, &config).await.unwrap();
    let claimed = queue.dequeue().await.unwrap().unwrap();

    let retried = queue.retry(&claimed, "timeout").await.unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.error.as_deref(), Some("timeout"));

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.processing, 0);

    let again = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(again.id, id);
    assert_eq!(again.attempts, 2);
}

#[tokio::test]
async fn test_retry_with_backoff_is_delayed() {
    let queue = memory_queue();
    let id = queue.enqueue(job("flaky")).await.unwrap();
    let claimed = queue.dequeue().await.unwrap().unwrap();

    let before = Utc::now();
    let retried = queue.retry(&claimed, "boom").await.unwrap();
    assert_eq!(retried.status, JobStatus::Retrying);
    // Exponential, first attempt: two seconds.
    assert!(retried.scheduled_at >= before + chrono::Duration::seconds(2));

    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Retrying);
    assert_eq!(queue.delayed_len().await.unwrap(), 1);
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn test_retry_keeps_metadata_changes() {
    let queue = memory_queue();
    let mut j = job("flaky");
    j.metadata.clear();
    queue.enqueue(j).await.unwrap();

    let mut claimed = queue.dequeue().await.unwrap().unwrap();
    claimed
        .metadata
        .insert(crate::job::BACKOFF_STRATEGY_KEY.to_string(), "none".to_string());

    let retried = queue.retry(&claimed, "boom").await.unwrap();
    assert_eq!(retried.backoff_strategy(), Some(BackoffStrategy::None));
    assert_eq!(retried.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_cancel_pending() {
    let queue = memory_queue();
    let id = queue.enqueue(job("report")).await.unwrap();

    assert!(queue.cancel(id).await.unwrap());
    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Cancelled);
    assert!(queue.dequeue().await.unwrap().is_none());

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.cancelled, 1);

    assert!(!queue.cancel(id).await.unwrap());
    assert_eq!(queue.stats().await.unwrap().cancelled, 1);
}

#[tokio::test]
async fn test_cancel_scheduled() {
    let queue = memory_queue();
    let config = JobConfig::default().with_delay(Duration::from_secs(60));
    let id = queue.submit("later", serde_json::Value::Null, &config).await.unwrap();

    assert!(queue.cancel(id).await.unwrap());
    assert_eq!(queue.delayed_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_processing_is_noop() {
    let queue = memory_queue();
    let id = queue.enqueue(job("report")).await.unwrap();
    queue.dequeue().await.unwrap().unwrap();

    assert!(!queue.cancel(id).await.unwrap());
    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Processing);
    queue.complete(id, None).await.unwrap();
}

#[tokio::test]
async fn test_get_and_cancel_missing() {
    let queue = memory_queue();
    let id = Uuid::now_v7();
    assert!(matches!(queue.get(id).await, Err(QueueError::JobNotFound(x)) if x == id));
    assert!(matches!(queue.cancel(id).await, Err(QueueError::JobNotFound(_))));
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let a = Queue::new(
        store.clone(),
        QueueOptions {
            namespace: "a".to_string(),
            ..Default::default()
        },
    );
    let b = Queue::new(
        store,
        QueueOptions {
            namespace: "b".to_string(),
            ..Default::default()
        },
    );

    let id = a.enqueue(job("report")).await.unwrap();
    assert!(b.dequeue().await.unwrap().is_none());
    assert!(matches!(b.get(id).await, Err(QueueError::JobNotFound(_))));
    assert_eq!(b.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_lease_reaped_and_requeued() {
    let queue = leased_queue(Duration::from_millis(50));
    let id = queue.enqueue(job("slow")).await.unwrap();
    queue.dequeue().await.unwrap().unwrap();

    assert_eq!(queue.reap_expired_leases().await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.reap_expired_leases().await.unwrap(), 1);

    let stored = queue.get(id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.processing, 0);

    // The late worker can no longer report.
    let err = queue.complete(id, None).await.unwrap_err();
    assert!(matches!(err, QueueError::LeaseExpired(x) if x == id));

    let again = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(again.attempts, 2);
    queue.complete(id, None).await.unwrap();
}

#[tokio::test]
async fn test_lease_released_on_complete() {
    let queue = leased_queue(Duration::from_millis(50));
    let id = queue.enqueue(job("fast")).await.unwrap();
    queue.dequeue().await.unwrap().unwrap();
    queue.complete(id, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.reap_expired_leases().await.unwrap(), 0);
    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_reap_without_leases_is_noop() {
    let queue = memory_queue();
    queue.enqueue(job("report")).await.unwrap();
    queue.dequeue().await.unwrap().unwrap();
    assert_eq!(queue.reap_expired_leases().await.unwrap(), 0);
}

#[tokio::test]
async fn test_terminal_records_expire() {
    let queue = Queue::new(
        Arc::new(MemoryStore::new()),
        QueueOptions {
            retention: Duration::from_millis(50),
            ..Default::default()
        },
    );
    let id = queue.enqueue(job("report")).await.unwrap();
    queue.dequeue().await.unwrap().unwrap();
    queue.complete(id, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(queue.get(id).await, Err(QueueError::JobNotFound(_))));
    assert_eq!(queue.stats().await.unwrap().completed, 1);
}

/// Store that fails the next batch write once armed.
struct FlakyStore {
    inner: MemoryStore,
    fail_next_execute: std::sync::atomic::AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_next_execute: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn fail_next_execute(&self) {
        self.fail_next_execute
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn range_by_score(
        &self,
        set: &str,
        max: i64,
        limit: usize,
    ) -> Result<Vec<crate::store::ScoredMember>, StoreError> {
        self.inner.range_by_score(set, max, limit).await
    }

    async fn remove_member(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.inner.remove_member(set, member).await
    }

    async fn set_len(&self, set: &str) -> Result<u64, StoreError> {
        self.inner.set_len(set).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.inner.incr_by(key, delta).await
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.counter(key).await
    }

    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        if self
            .fail_next_execute
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(StoreError::Connection("connection reset".to_string()));
        }
        self.inner.execute(ops).await
    }
}

fn flaky_queue() -> (Arc<FlakyStore>, Queue) {
    let store = Arc::new(FlakyStore::new());
    let queue = Queue::new(store.clone(), QueueOptions::default());
    (store, queue)
}

#[tokio::test]
async fn test_failed_claim_keeps_job_ready() {
    let (store, queue) = flaky_queue();
    let id = queue.enqueue(job("resize").with_priority(-3)).await.unwrap();

    store.fail_next_execute();
    let err = queue.dequeue().await.unwrap_err();
    assert!(matches!(err, QueueError::Store(_)));

    assert_eq!(queue.ready_len().await.unwrap(), 1);
    let pending = queue.get(id).await.unwrap();
    assert_eq!(pending.status, JobStatus::Pending);
    assert_eq!(pending.attempts, 0);

    let claimed = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.attempts, 1);
    assert_eq!(queue.stats().await.unwrap().processing, 1);
}

#[tokio::test]
async fn test_failed_claim_job_stays_cancellable() {
    let (store, queue) = flaky_queue();
    let id = queue.enqueue(job("resize")).await.unwrap();

    store.fail_next_execute();
    assert!(queue.dequeue().await.is_err());

    assert!(queue.cancel(id).await.unwrap());
    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Cancelled);
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_promotion_keeps_job_delayed() {
    let (store, queue) = flaky_queue();
    let id = queue
        .enqueue(job("digest").with_scheduled_at(Utc::now() + chrono::Duration::milliseconds(50)))
        .await
        .unwrap();
    assert_eq!(queue.delayed_len().await.unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(80)).await;

    store.fail_next_execute();
    let err = queue.promote_due().await.unwrap_err();
    assert!(matches!(err, QueueError::Store(_)));
    assert_eq!(queue.delayed_len().await.unwrap(), 1);
    assert_eq!(queue.ready_len().await.unwrap(), 0);

    let claimed = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(queue.delayed_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_oversized_visibility_timeout_saturates() {
    let queue = leased_queue(Duration::from_secs(u64::MAX / 2));
    let id = queue.enqueue(job("archive")).await.unwrap();

    let claimed = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(queue.reap_expired_leases().await.unwrap(), 0);
    assert_eq!(queue.get(id).await.unwrap().status, JobStatus::Processing);
}
