//! In-memory store.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{ScoredMember, Store, StoreOp};
use crate::error::StoreError;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

struct Record {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: String, score: i64) {
        if let Some(old) = self.scores.insert(member.clone(), score) {
            self.ordered.remove(&(old, member.clone()));
        }
        self.ordered.insert((score, member));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Record>,
    sets: HashMap<String, SortedSet>,
    counters: HashMap<String, i64>,
    last_purge: Option<Instant>,
}

impl Inner {
    fn apply(&mut self, op: StoreOp, now: Instant) {
        match op {
            StoreOp::Set { key, value, ttl } => {
                let expires_at = ttl.map(|ttl| now + ttl);
                self.records.insert(key, Record { value, expires_at });
            }
            StoreOp::Delete { key } => {
                self.records.remove(&key);
            }
            StoreOp::AddMember { set, member, score } => {
                self.sets.entry(set).or_default().insert(member, score);
            }
            StoreOp::RemoveMember { set, member } => {
                if let Some(s) = self.sets.get_mut(&set) {
                    s.remove(&member);
                }
            }
            StoreOp::IncrBy { key, delta } => {
                *self.counters.entry(key).or_insert(0) += delta;
            }
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        if self.last_purge.is_some_and(|at| now.duration_since(at) < PURGE_INTERVAL) {
            return;
        }
        self.records.retain(|_, r| r.is_live(now));
        self.last_purge = Some(now);
    }
}

/// Process-local store.
///
/// Every operation runs under one lock, so batches are trivially atomic and
/// conditional removals are linearizable.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of live records.
    pub fn record_count(&self) -> usize {
        let now = Instant::now();
        self.inner.lock().records.values().filter(|r| r.is_live(now)).count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired = match inner.records.get(key) {
            Some(record) if record.is_live(now) => return Ok(Some(record.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.records.remove(key);
        }
        Ok(None)
    }

    async fn range_by_score(
        &self,
        set: &str,
        max: i64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let inner = self.inner.lock();
        let Some(s) = inner.sets.get(set) else {
            return Ok(Vec::new());
        };

        Ok(s.ordered
            .iter()
            .take_while(|(score, _)| *score <= max)
            .take(limit)
            .map(|(score, member)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect())
    }

    async fn remove_member(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner
            .sets
            .get_mut(set)
            .is_some_and(|s| s.remove(member)))
    }

    async fn set_len(&self, set: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.sets.get(set).map_or(0, |s| s.scores.len() as u64))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        let value = inner.counters.entry(key.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.inner.lock().counters.get(key).copied().unwrap_or(0))
    }

    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let now = Instant::now();
        let expiring = ops
            .iter()
            .any(|op| matches!(op, StoreOp::Set { ttl: Some(_), .. }));

        let mut inner = self.inner.lock();
        if expiring {
            inner.purge_expired(now);
        }
        for op in ops {
            inner.apply(op, now);
        }
        Ok(())
    }
}
