//! Index reconciliation.
//!
//! The vector index is derived from memory rows, and dual writes can leave it
//! behind (a failed upsert, a crash between delete and insert). The
//! reconciler walks active rows, embeds the ones that never got a vector,
//! and re-upserts every embedded row into the index.

use std::sync::Arc;

use mnemo_types::error::MemoryError;
use mnemo_types::memory::MemoryScope;

use super::service::MemoryService;
use super::similarity::parse_embedding;
use super::store::MemoryRepository;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scopes: usize,
    pub scanned: usize,
    /// Rows that received a new embedding.
    pub embedded: usize,
    /// Rows written to the index.
    pub indexed: usize,
    /// Rows left without an embedding or index entry.
    pub failed: usize,
    /// Expired pending batches purged in the same pass.
    pub expired_batches: u64,
}

impl ReconcileReport {
    fn merge(&mut self, other: &ReconcileReport) {
        self.scopes += other.scopes;
        self.scanned += other.scanned;
        self.embedded += other.embedded;
        self.indexed += other.indexed;
        self.failed += other.failed;
        self.expired_batches += other.expired_batches;
    }
}

pub struct Reconciler<R: MemoryRepository> {
    service: Arc<MemoryService<R>>,
}

impl<R: MemoryRepository> Reconciler<R> {
    pub fn new(service: Arc<MemoryService<R>>) -> Self {
        Self { service }
    }

    /// Repair embeddings and index entries for one scope.
    #[tracing::instrument(
        name = "reconcile_scope",
        skip(self, scope),
        fields(persona_id = %scope.persona_id, user_id = scope.user_id)
    )]
    pub async fn reconcile_scope(&self, scope: &MemoryScope) -> Result<ReconcileReport, MemoryError> {
        let memories = self.service.active_memories(scope).await?;
        let mut report = ReconcileReport {
            scopes: 1,
            scanned: memories.len(),
            ..Default::default()
        };

        for mut memory in memories {
            let had_embedding = memory.embedding.as_deref().and_then(parse_embedding).is_some();
            let vector = if self.service.embedding_enabled() {
                self.service.ensure_embedding(&mut memory).await
            } else {
                memory.embedding.as_deref().and_then(parse_embedding)
            };

            let Some(vector) = vector else {
                report.failed += 1;
                continue;
            };
            if !had_embedding {
                report.embedded += 1;
            }
            if self.service.index_enabled() {
                if self.service.index_upsert(&memory, &vector).await {
                    report.indexed += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            scanned = report.scanned,
            embedded = report.embedded,
            indexed = report.indexed,
            failed = report.failed,
            "scope reconciled"
        );
        Ok(report)
    }

    /// Reconcile every scope that owns active memories.
    ///
    /// A scope that fails to load is logged and skipped.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport, MemoryError> {
        let scopes = self.service.repository().active_scopes().await?;
        let mut total = ReconcileReport::default();
        for scope in &scopes {
            match self.reconcile_scope(scope).await {
                Ok(report) => total.merge(&report),
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "scope reconciliation failed");
                }
            }
        }
        tracing::info!(
            scopes = total.scopes,
            embedded = total.embedded,
            indexed = total.indexed,
            failed = total.failed,
            "reconciliation finished"
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::memory::box_embedder::BoxEmbedder;
    use crate::memory::box_vector::BoxVectorIndex;
    use crate::memory::testing::{InMemoryRepository, KeywordEmbedder, ScriptedIndex, memory_aged};

    #[tokio::test]
    async fn test_reconcile_embeds_and_indexes_missing_rows() {
        let repo = Arc::new(InMemoryRepository::new());
        let a = memory_aged(&MemoryScope::new("P", 1), "likes coffee", 2);
        let b = memory_aged(&MemoryScope::new("P", 2), "works remotely", 1);
        repo.insert(a.clone());
        repo.insert(b.clone());
        let index = Arc::new(ScriptedIndex::new());
        let service = MemoryService::new(repo.clone())
            .with_embedder(BoxEmbedder::new(Arc::new(KeywordEmbedder::new())))
            .with_vector_index(BoxVectorIndex::new(index.clone()));
        let reconciler = Reconciler::new(Arc::new(service));

        let report = reconciler.reconcile_all().await.unwrap();
        assert_eq!(report.scopes, 2);
        assert_eq!(report.embedded, 2);
        assert_eq!(report.indexed, 2);
        assert!(index.contains(&a.id));
        assert!(index.contains(&b.id));
        assert!(repo.snapshot().iter().all(|m| m.embedding.is_some()));

        // A second pass re-upserts without re-embedding.
        let again = reconciler.reconcile_all().await.unwrap();
        assert_eq!(again.embedded, 0);
        assert_eq!(again.indexed, 2);
    }

    #[tokio::test]
    async fn test_reconcile_counts_unembeddable_rows() {
        let repo = Arc::new(InMemoryRepository::new());
        let scope = MemoryScope::new("P", 1);
        repo.insert(memory_aged(&scope, "likes coffee", 0));
        let embedder = Arc::new(KeywordEmbedder::new());
        embedder.fail.store(true, Ordering::SeqCst);
        let service = MemoryService::new(repo.clone()).with_embedder(BoxEmbedder::new(embedder));
        let reconciler = Reconciler::new(Arc::new(service));

        let report = reconciler.reconcile_scope(&scope).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.indexed, 0);
    }
}
