//! PendingCache trait definition.
//!
//! A key-value store for in-flight `PendingBatch` values with per-entry
//! expiry and a version number that supports optimistic compare-and-set.

use std::time::Duration;

use mnemo_types::error::RepositoryError;
use mnemo_types::memory::PendingBatch;

/// A cached batch together with the version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedBatch {
    pub batch: PendingBatch,
    pub version: u64,
}

/// Versioned cache for pending chat batches.
///
/// Expired entries behave exactly like absent ones.
pub trait PendingCache: Send + Sync {
    /// Read the live entry for `key`.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<VersionedBatch>, RepositoryError>> + Send;

    /// Write `batch` if the stored version equals `expected`.
    ///
    /// `expected = None` means the key must be absent (or expired). On success
    /// the entry's expiry is reset to `now + ttl` and the new version is
    /// returned; `Ok(None)` signals a lost race.
    fn compare_and_set(
        &self,
        key: &str,
        batch: &PendingBatch,
        expected: Option<u64>,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<Option<u64>, RepositoryError>> + Send;

    /// Delete the entry only if it is still at `version`.
    fn remove_if_version(
        &self,
        key: &str,
        version: u64,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Drop every expired entry. Returns the number removed.
    fn purge_expired(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
