//! MemoryRepository trait definition.
//!
//! The relational store is the source of truth for memory rows. Every
//! scope-filtered read enforces both `persona_id` and `user_id`.

use mnemo_types::error::RepositoryError;
use mnemo_types::memory::{Memory, MemoryScope, MemoryStatus};

/// Repository trait for long-term memory persistence.
///
/// Implementations live in mnemo-infra (e.g., `SqliteMemoryRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait MemoryRepository: Send + Sync {
    /// Insert a new memory row.
    fn create(
        &self,
        memory: &Memory,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert several rows in one transaction.
    fn batch_create(
        &self,
        memories: &[Memory],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Fetch a non-deleted memory by id, regardless of scope or status.
    fn get_by_id(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Memory>, RepositoryError>> + Send;

    /// Active, non-deleted memories for a scope, newest first.
    fn get_active_by_scope(
        &self,
        scope: &MemoryScope,
    ) -> impl std::future::Future<Output = Result<Vec<Memory>, RepositoryError>> + Send;

    /// All non-deleted memories for a scope including superseded, newest first.
    fn get_all_by_scope(
        &self,
        scope: &MemoryScope,
    ) -> impl std::future::Future<Output = Result<Vec<Memory>, RepositoryError>> + Send;

    /// Active, non-deleted memories among `ids` that belong to `scope`.
    ///
    /// The result order is unspecified.
    fn get_active_by_ids(
        &self,
        scope: &MemoryScope,
        ids: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Memory>, RepositoryError>> + Send;

    /// Overwrite the mutable fields of an existing row.
    fn update(
        &self,
        memory: &Memory,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Transition a memory's status, recording its replacement.
    fn update_status(
        &self,
        id: &str,
        status: MemoryStatus,
        superseded_by: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Store a serialized embedding and stamp `embedding_updated_at`.
    fn update_embedding(
        &self,
        id: &str,
        embedding: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Mark a memory deleted without removing the row.
    fn soft_delete(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Increment `hit_count` and set `last_hit_at` for each id.
    fn record_hits(
        &self,
        ids: &[String],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Distinct scopes that own at least one active memory.
    fn active_scopes(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<MemoryScope>, RepositoryError>> + Send;
}
