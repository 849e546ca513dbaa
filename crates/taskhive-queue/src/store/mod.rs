//! Shared store abstraction backing the queue.
//!
//! The queue needs four kinds of primitives from its store:
//!
//! - key/value records with an optional time-to-live,
//! - ordered sets of members with integer scores, including a conditional
//!   removal that reports whether the member was actually removed,
//! - integer counters,
//! - atomic batches of writes.
//!
//! The conditional removal is what makes claims safe: when several workers
//! race for the same member, exactly one of them sees `true`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

mod memory;
mod sqlite;
mod schema;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A member of an ordered set together with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMember {
    pub member: String,
    pub score: i64,
}

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Insert or replace a record.
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    /// Delete a record.
    Delete { key: String },
    /// Insert a member or update its score.
    AddMember {
        set: String,
        member: String,
        score: i64,
    },
    /// Remove a member if present.
    RemoveMember { set: String, member: String },
    /// Add `delta` to a counter, creating it at zero.
    IncrBy { key: String, delta: i64 },
}

/// Store trait for queue persistence.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name, for logs.
    fn backend(&self) -> &'static str;

    /// Read a record. Expired records read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Members with `score <= max`, lowest score first, at most `limit`.
    /// Equal scores are ordered by member.
    async fn range_by_score(
        &self,
        set: &str,
        max: i64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError>;

    /// Remove a member, reporting whether this call removed it.
    async fn remove_member(&self, set: &str, member: &str) -> Result<bool, StoreError>;

    /// Number of members in a set.
    async fn set_len(&self, set: &str) -> Result<u64, StoreError>;

    /// Add `delta` to a counter and return the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Current counter value, zero when missing.
    async fn counter(&self, key: &str) -> Result<i64, StoreError>;

    /// Apply all writes atomically: either every op is visible or none is.
    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;

    /// Insert or replace a single record.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.execute(vec![StoreOp::Set {
            key: key.to_string(),
            value,
            ttl,
        }])
        .await
    }

    /// Insert a member or update its score.
    async fn add_member(&self, set: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.execute(vec![StoreOp::AddMember {
            set: set.to_string(),
            member: member.to_string(),
            score,
        }])
        .await
    }
}
