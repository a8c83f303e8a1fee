//! Memory write paths and the embedding/index plumbing shared with retrieval.
//!
//! `MemoryService` is the only component that writes memory rows or touches
//! the vector index. The relational write is authoritative; embedding
//! precompute and index maintenance are best-effort and never roll back a
//! committed row. Divergence between the two stores is logged with
//! `consistency = true` and healed by lazy re-embedding or reconciliation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use mnemo_types::config::RetrievalConfig;
use mnemo_types::error::{EmbeddingError, MemoryError};
use mnemo_types::memory::{Memory, MemoryScope, MemoryStatus};

use super::box_embedder::BoxEmbedder;
use super::box_vector::BoxVectorIndex;
use super::similarity::{parse_embedding, serialize_embedding};
use super::store::MemoryRepository;

/// Per-step limits for calls that leave the process.
#[derive(Debug, Clone, Copy)]
pub struct ServiceTimeouts {
    pub embed: Duration,
    pub index: Duration,
    pub scan: Duration,
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for ServiceTimeouts {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            embed: Duration::from_secs(config.embed_timeout_secs),
            index: Duration::from_secs(config.search_timeout_secs),
            scan: Duration::from_secs(config.scan_timeout_secs),
        }
    }
}

/// Memory persistence over a relational repository, an optional embedder and
/// an optional vector index.
pub struct MemoryService<R: MemoryRepository> {
    repo: Arc<R>,
    embedder: Option<Arc<BoxEmbedder>>,
    index: Option<Arc<BoxVectorIndex>>,
    timeouts: ServiceTimeouts,
}

impl<R: MemoryRepository> MemoryService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            embedder: None,
            index: None,
            timeouts: ServiceTimeouts::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: BoxEmbedder) -> Self {
        self.embedder = Some(Arc::new(embedder));
        self
    }

    pub fn with_vector_index(mut self, index: BoxVectorIndex) -> Self {
        self.index = Some(Arc::new(index));
        self
    }

    pub fn with_timeouts(mut self, timeouts: ServiceTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn timeouts(&self) -> ServiceTimeouts {
        self.timeouts
    }

    pub fn embedding_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn index_enabled(&self) -> bool {
        self.index.is_some()
    }

    // ---- Embedding + index plumbing ----

    /// Embed `text` within the embed timeout.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let Some(embedder) = &self.embedder else {
            return Err(EmbeddingError::NotConfigured("no embedding provider".to_string()).into());
        };
        match tokio::time::timeout(self.timeouts.embed, embedder.embed(text)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(MemoryError::Timeout(self.timeouts.embed)),
        }
    }

    /// Compute the embedding for a row about to be written.
    ///
    /// Failures are logged; the row is then written without an embedding and
    /// picked up later by the lazy path in retrieval or by reconciliation.
    async fn precompute_embedding(&self, memory: &mut Memory) -> Option<Vec<f32>> {
        if !self.embedding_enabled() {
            return None;
        }
        let vector = match self.embed(&memory.content).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(memory_id = %memory.id, error = %e, "embedding precompute failed");
                return None;
            }
        };
        match serialize_embedding(&vector) {
            Ok(serialized) => {
                memory.embedding = Some(serialized);
                memory.embedding_updated_at = Some(Utc::now());
                Some(vector)
            }
            Err(e) => {
                tracing::warn!(memory_id = %memory.id, error = %e, "embedding not serializable");
                None
            }
        }
    }

    /// Return the stored embedding, or compute and persist a missing one.
    ///
    /// `None` when the stored value is unreadable and recomputing failed.
    pub async fn ensure_embedding(&self, memory: &mut Memory) -> Option<Vec<f32>> {
        if let Some(vector) = memory.embedding.as_deref().and_then(parse_embedding) {
            return Some(vector);
        }

        let vector = match self.embed(&memory.content).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::debug!(memory_id = %memory.id, error = %e, "lazy embedding failed");
                return None;
            }
        };
        let serialized = serialize_embedding(&vector).ok()?;
        match self.repo.update_embedding(&memory.id, &serialized).await {
            Ok(()) => {
                memory.embedding = Some(serialized);
                memory.embedding_updated_at = Some(Utc::now());
            }
            Err(e) => {
                tracing::warn!(memory_id = %memory.id, error = %e, "failed to persist lazy embedding");
            }
        }
        Some(vector)
    }

    /// Upsert a memory's vector into the index. Returns whether it landed.
    pub async fn index_upsert(&self, memory: &Memory, vector: &[f32]) -> bool {
        let Some(index) = &self.index else {
            return false;
        };
        let scope = memory.scope();
        let upsert = async {
            index.ensure_ready(vector.len()).await?;
            index.upsert(&memory.id, &scope, vector).await
        };
        match tokio::time::timeout(self.timeouts.index, upsert).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(consistency = true, memory_id = %memory.id, error = %e, "vector index upsert failed");
                false
            }
            Err(_) => {
                tracing::warn!(consistency = true, memory_id = %memory.id, "vector index upsert timed out");
                false
            }
        }
    }

    async fn index_delete(&self, id: &str) {
        let Some(index) = &self.index else {
            return;
        };
        match tokio::time::timeout(self.timeouts.index, index.delete(id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(consistency = true, memory_id = %id, error = %e, "vector index delete failed");
            }
            Err(_) => {
                tracing::warn!(consistency = true, memory_id = %id, "vector index delete timed out");
            }
        }
    }

    /// Scoped similarity search. `None` when the index is absent or failed.
    pub async fn search_index(
        &self,
        scope: &MemoryScope,
        query: &[f32],
        top_k: usize,
    ) -> Option<Vec<String>> {
        let index = self.index.as_ref()?;
        let search = async {
            index.ensure_ready(query.len()).await?;
            index.search(scope, query, top_k).await
        };
        match tokio::time::timeout(self.timeouts.index, search).await {
            Ok(Ok(ids)) => Some(ids),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "vector index search failed");
                None
            }
            Err(_) => {
                tracing::warn!("vector index search timed out");
                None
            }
        }
    }

    // ---- Reads ----

    pub async fn active_memories(&self, scope: &MemoryScope) -> Result<Vec<Memory>, MemoryError> {
        Ok(self.repo.get_active_by_scope(scope).await?)
    }

    pub async fn all_memories(&self, scope: &MemoryScope) -> Result<Vec<Memory>, MemoryError> {
        Ok(self.repo.get_all_by_scope(scope).await?)
    }

    /// Load a memory and verify it belongs to `scope`.
    pub async fn get_owned(&self, scope: &MemoryScope, id: &str) -> Result<Memory, MemoryError> {
        let memory = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        if !memory.belongs_to(scope) {
            return Err(MemoryError::Forbidden(id.to_string()));
        }
        Ok(memory)
    }

    /// Best-effort usage statistics for retrieved memories.
    pub async fn record_hits(&self, memories: &[Memory]) {
        if memories.is_empty() {
            return;
        }
        let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
        if let Err(e) = self.repo.record_hits(&ids).await {
            tracing::debug!(error = %e, count = ids.len(), "failed to record memory hits");
        }
    }

    // ---- Writes ----

    /// Persist a new memory: embed, write the row, upsert the index.
    #[tracing::instrument(
        name = "create_memory",
        skip(self, memory),
        fields(memory_id = %memory.id, persona_id = %memory.persona_id, user_id = memory.user_id, source = %memory.source)
    )]
    pub async fn create(&self, mut memory: Memory) -> Result<Memory, MemoryError> {
        let vector = self.precompute_embedding(&mut memory).await;
        self.repo.create(&memory).await?;
        if let Some(vector) = vector {
            self.index_upsert(&memory, &vector).await;
        }
        Ok(memory)
    }

    /// Create `replacement` and flip `old_id` to superseded, pointing at it.
    ///
    /// The two writes are independent. If the status flip fails the old row
    /// stays active next to the new one and the error is returned.
    pub async fn supersede(&self, old_id: &str, replacement: Memory) -> Result<Memory, MemoryError> {
        let created = self.create(replacement).await?;
        if let Err(e) = self
            .repo
            .update_status(old_id, MemoryStatus::Superseded, Some(&created.id))
            .await
        {
            tracing::warn!(
                consistency = true,
                old_id,
                new_id = %created.id,
                error = %e,
                "failed to supersede memory; old and new both active"
            );
            return Err(e.into());
        }
        self.index_delete(old_id).await;
        Ok(created)
    }

    /// Manual edit: replace a memory's content in place and re-embed it.
    pub async fn update_content(
        &self,
        scope: &MemoryScope,
        id: &str,
        content: &str,
        keywords: Option<String>,
    ) -> Result<Memory, MemoryError> {
        let mut memory = self.get_owned(scope, id).await?;
        if memory.status == MemoryStatus::Superseded {
            return Err(MemoryError::InvalidInput(format!("memory {id} is superseded")));
        }

        memory.content = content.to_string();
        if keywords.is_some() {
            memory.keywords = keywords.filter(|k| !k.trim().is_empty());
        }
        memory.updated_at = Utc::now();
        memory.embedding = None;
        memory.embedding_updated_at = None;

        let vector = self.precompute_embedding(&mut memory).await;
        self.repo.update(&memory).await?;
        match vector {
            Some(vector) => {
                self.index_upsert(&memory, &vector).await;
            }
            // The indexed vector describes the old content.
            None => self.index_delete(&memory.id).await,
        }
        Ok(memory)
    }

    /// Manual delete: soft-delete the row and drop its index entry.
    pub async fn delete(&self, scope: &MemoryScope, id: &str) -> Result<(), MemoryError> {
        let memory = self.get_owned(scope, id).await?;
        self.repo.soft_delete(&memory.id).await?;
        self.index_delete(&memory.id).await;
        Ok(())
    }
}
