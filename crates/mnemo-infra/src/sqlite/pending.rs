//! SQLite-backed pending-batch cache.
//!
//! Batches are stored JSON-encoded with a version and an absolute expiry in
//! unix milliseconds. Every write goes through the single-connection writer
//! pool, so each conditional statement below is an atomic compare-and-set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use sqlx::Row;

use mnemo_core::memory::cache::{PendingCache, VersionedBatch};
use mnemo_types::error::RepositoryError;
use mnemo_types::memory::PendingBatch;

use super::pool::DatabasePool;

/// SQLite implementation of `PendingCache`.
pub struct SqlitePendingCache {
    pool: DatabasePool,
    /// Next version to hand out. Seeded from the clock so versions keep
    /// increasing across restarts.
    next_version: AtomicU64,
}

impl SqlitePendingCache {
    pub fn new(pool: DatabasePool) -> Self {
        let seed = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(1);
        Self {
            pool,
            next_version: AtomicU64::new(seed),
        }
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

impl PendingCache for SqlitePendingCache {
    async fn get(&self, key: &str) -> Result<Option<VersionedBatch>, RepositoryError> {
        let row = sqlx::query(
            "SELECT value, version FROM pending_batches WHERE cache_key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: String = row.try_get("value").map_err(query_error)?;
        let version: i64 = row.try_get("version").map_err(query_error)?;
        let batch: PendingBatch = serde_json::from_str(&value)
            .map_err(|e| RepositoryError::Query(format!("invalid pending batch {key}: {e}")))?;

        Ok(Some(VersionedBatch {
            batch,
            version: version as u64,
        }))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        batch: &PendingBatch,
        expected: Option<u64>,
        ttl: Duration,
    ) -> Result<Option<u64>, RepositoryError> {
        let value = serde_json::to_string(batch)
            .map_err(|e| RepositoryError::Query(format!("failed to encode pending batch: {e}")))?;
        let version = self.bump_version();
        let now = now_millis();

        let result = match expected {
            // Insert, or take over an entry that has already expired.
            None => sqlx::query(
                r#"INSERT INTO pending_batches (cache_key, value, version, expires_at)
                   VALUES (?, ?, ?, ?)
                   ON CONFLICT(cache_key) DO UPDATE
                   SET value = excluded.value, version = excluded.version, expires_at = excluded.expires_at
                   WHERE pending_batches.expires_at <= ?"#,
            )
            .bind(key)
            .bind(value.as_str())
            .bind(version as i64)
            .bind(expiry_millis(ttl))
            .bind(now)
            .execute(&self.pool.writer)
            .await,
            Some(expected) => sqlx::query(
                r#"UPDATE pending_batches SET value = ?, version = ?, expires_at = ?
                   WHERE cache_key = ? AND version = ? AND expires_at > ?"#,
            )
            .bind(value.as_str())
            .bind(version as i64)
            .bind(expiry_millis(ttl))
            .bind(key)
            .bind(expected as i64)
            .bind(now)
            .execute(&self.pool.writer)
            .await,
        }
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(version))
    }

    async fn remove_if_version(&self, key: &str, version: u64) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM pending_batches WHERE cache_key = ? AND version = ?")
            .bind(key)
            .bind(version as i64)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM pending_batches WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}
