//! SQLite store backend.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, Transaction, params};
use tokio_rusqlite::Connection;

use super::schema::{enable_wal, init_schema};
use super::{ScoredMember, Store, StoreOp};
use crate::error::StoreError;

/// Store shared by every process that opens the same database file.
///
/// All statements go through one connection thread; each batch runs in a
/// single transaction.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| Ok(init_schema(conn)?)).await?;

        Ok(Self { conn })
    }

    /// Open or create a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| {
            enable_wal(conn)?;
            Ok(init_schema(conn)?)
        })
        .await?;

        Ok(Self { conn })
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn apply(tx: &Transaction<'_>, op: StoreOp, now: i64) -> rusqlite::Result<()> {
    match op {
        StoreOp::Set { key, value, ttl } => {
            let expires_at = ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64));
            tx.execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )?;
        }
        StoreOp::Delete { key } => {
            tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        StoreOp::AddMember { set, member, score } => {
            tx.execute(
                "INSERT INTO sorted_sets (set_name, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(set_name, member) DO UPDATE SET score = excluded.score",
                params![set, member, score],
            )?;
        }
        StoreOp::RemoveMember { set, member } => {
            tx.execute(
                "DELETE FROM sorted_sets WHERE set_name = ?1 AND member = ?2",
                params![set, member],
            )?;
        }
        StoreOp::IncrBy { key, delta } => {
            tx.execute(
                "INSERT INTO counters (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
                params![key, delta],
            )?;
        }
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let key = key.to_string();
        let now = now_millis();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM kv
                         WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                        params![key, now],
                        |row| row.get::<_, Vec<u8>>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    async fn range_by_score(
        &self,
        set: &str,
        max: i64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let set = set.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let members = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT member, score FROM sorted_sets
                     WHERE set_name = ?1 AND score <= ?2
                     ORDER BY score ASC, member ASC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![set, max, limit], |row| {
                    Ok(ScoredMember {
                        member: row.get(0)?,
                        score: row.get(1)?,
                    })
                })?;
                let members = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(members)
            })
            .await?;
        Ok(members)
    }

    async fn remove_member(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let set = set.to_string();
        let member = member.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "DELETE FROM sorted_sets WHERE set_name = ?1 AND member = ?2",
                    params![set, member],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(removed)
    }

    async fn set_len(&self, set: &str) -> Result<u64, StoreError> {
        let set = set.to_string();
        let len = self
            .conn
            .call(move |conn| {
                let len: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sorted_sets WHERE set_name = ?1",
                    params![set],
                    |row| row.get(0),
                )?;
                Ok(len)
            })
            .await?;
        Ok(len.max(0) as u64)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn.query_row(
                    "INSERT INTO counters (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = value + excluded.value
                     RETURNING value",
                    params![key, delta],
                    |row| row.get::<_, i64>(0),
                )?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM counters WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;
                Ok(value.unwrap_or(0))
            })
            .await?;
        Ok(value)
    }

    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        let expiring = ops
            .iter()
            .any(|op| matches!(op, StoreOp::Set { ttl: Some(_), .. }));

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if expiring {
                    tx.execute(
                        "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                        params![now],
                    )?;
                }
                for op in ops {
                    apply(&tx, op, now)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
