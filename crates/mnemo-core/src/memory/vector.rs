//! Vector index trait.
//!
//! The index is a disposable projection of the relational store: it holds
//! only `id`, the scope attributes and the vector, never the memory payload,
//! and can always be rebuilt from memory rows.
//! Implementations (e.g., LanceDB) live in mnemo-infra.

use mnemo_types::error::VectorIndexError;
use mnemo_types::memory::MemoryScope;

/// Trait for a scope-filtered similarity index keyed by memory id.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait VectorIndex: Send + Sync {
    /// Create the collection if absent, otherwise verify its dimension.
    ///
    /// Idempotent. A stored dimension different from `dimension` fails with
    /// `DimensionMismatch`; vectors are never truncated or padded.
    fn ensure_ready(
        &self,
        dimension: usize,
    ) -> impl std::future::Future<Output = Result<(), VectorIndexError>> + Send;

    /// Replace the entry for `id`.
    ///
    /// Delete-then-insert, so not atomic: a crash in between loses the entry
    /// until the next upsert or reconciliation.
    fn upsert(
        &self,
        id: &str,
        scope: &MemoryScope,
        vector: &[f32],
    ) -> impl std::future::Future<Output = Result<(), VectorIndexError>> + Send;

    /// Remove the entry for `id`. Silent no-op if absent.
    fn delete(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), VectorIndexError>> + Send;

    /// Ids in `scope` ordered by descending similarity, at most `top_k`.
    ///
    /// An empty result is not an error.
    fn search(
        &self,
        scope: &MemoryScope,
        query: &[f32],
        top_k: usize,
    ) -> impl std::future::Future<Output = Result<Vec<String>, VectorIndexError>> + Send;
}
