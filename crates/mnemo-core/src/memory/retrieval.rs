//! Similarity-ranked memory retrieval with graceful degradation.
//!
//! Tiers, tried in order:
//! 1. **index** -- embed the query, search the vector index in scope, hydrate
//!    active rows from the store and re-order them to the index ranking.
//! 2. **scan** -- cosine-score every active memory in process, embedding
//!    rows that lack a stored vector on the way.
//! 3. **store** -- all active memories newest-first, unranked. Used when
//!    embeddings are disabled, the query is blank, `top_k <= 0`, or the
//!    query embedding fails.

use std::collections::HashMap;

use mnemo_types::error::MemoryError;
use mnemo_types::memory::{Memory, MemoryScope};

use super::service::MemoryService;
use super::similarity::cosine_similarity;
use super::store::MemoryRepository;

/// Heading placed above retrieved memories in a prompt.
pub const MEMORY_PROMPT_HEADER: &str = "## What you know about the user:\n";

/// Which tier produced a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalSource {
    Index,
    Scan,
    Store,
}

impl RetrievalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalSource::Index => "index",
            RetrievalSource::Scan => "scan",
            RetrievalSource::Store => "store",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub memories: Vec<Memory>,
    pub source: RetrievalSource,
}

impl<R: MemoryRepository> MemoryService<R> {
    /// Retrieve up to `top_k` active memories for `scope` ranked against `query`.
    ///
    /// Only a failure to read the scope's active memories is returned as an
    /// error; embedding and index problems fall through to the next tier.
    #[tracing::instrument(
        name = "retrieve_memories",
        skip(self, scope, query),
        fields(persona_id = %scope.persona_id, user_id = scope.user_id)
    )]
    pub async fn retrieve(
        &self,
        scope: &MemoryScope,
        query: &str,
        top_k: i64,
    ) -> Result<RetrievalOutcome, MemoryError> {
        if !self.embedding_enabled() || query.trim().is_empty() || top_k <= 0 {
            return self
                .retrieve_from_store(scope, "embedding_disabled_or_query_empty")
                .await;
        }
        let top_k = top_k as usize;

        let query_vector = match self.embed(query).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::debug!(error = %e, "query embedding failed");
                return self.retrieve_from_store(scope, "embed_failed").await;
            }
        };

        if let Some(memories) = self.retrieve_from_index(scope, &query_vector, top_k).await {
            tracing::info!(source = "index", count = memories.len(), "memories retrieved");
            return Ok(RetrievalOutcome {
                memories,
                source: RetrievalSource::Index,
            });
        }

        let limit = self.timeouts().scan;
        match tokio::time::timeout(limit, self.scan(scope, &query_vector, top_k)).await {
            Ok(result) => {
                let memories = result?;
                tracing::info!(
                    source = "scan",
                    reason = "index_miss_or_unavailable",
                    count = memories.len(),
                    "memories retrieved"
                );
                Ok(RetrievalOutcome {
                    memories,
                    source: RetrievalSource::Scan,
                })
            }
            Err(_) => {
                tracing::warn!(timeout = ?limit, "similarity scan timed out");
                self.retrieve_from_store(scope, "scan_timed_out").await
            }
        }
    }

    async fn retrieve_from_store(
        &self,
        scope: &MemoryScope,
        reason: &'static str,
    ) -> Result<RetrievalOutcome, MemoryError> {
        let memories = self.active_memories(scope).await?;
        tracing::info!(source = "store", reason, count = memories.len(), "memories retrieved");
        Ok(RetrievalOutcome {
            memories,
            source: RetrievalSource::Store,
        })
    }

    async fn retrieve_from_index(
        &self,
        scope: &MemoryScope,
        query_vector: &[f32],
        top_k: usize,
    ) -> Option<Vec<Memory>> {
        let ids = self.search_index(scope, query_vector, top_k).await?;
        if ids.is_empty() {
            return None;
        }

        let rows = match self.repository().get_active_by_ids(scope, &ids).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "failed to hydrate index hits");
                return None;
            }
        };

        let ordered = order_by_ranking(rows, &ids, scope);
        if ordered.is_empty() {
            tracing::warn!(
                consistency = true,
                hits = ids.len(),
                "index hits hydrated to no active memories"
            );
            return None;
        }
        Some(ordered)
    }

    /// Cosine-score every active memory in scope against `query_vector`.
    ///
    /// Memories that cannot be embedded are left out. If none can be scored
    /// the whole active list is returned unranked.
    async fn scan(
        &self,
        scope: &MemoryScope,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Memory>, MemoryError> {
        let memories = self.active_memories(scope).await?;

        let mut scored: Vec<(f64, Memory)> = Vec::with_capacity(memories.len());
        let mut unscored: Vec<Memory> = Vec::new();
        for mut memory in memories {
            match self.ensure_embedding(&mut memory).await {
                Some(vector) => scored.push((cosine_similarity(query_vector, &vector), memory)),
                None => unscored.push(memory),
            }
        }

        if scored.is_empty() {
            return Ok(unscored);
        }

        // Stable sort: equal scores keep the store's newest-first order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(top_k).map(|(_, m)| m).collect())
    }
}

/// Re-order hydrated rows to the index's ranking, re-validating ownership.
fn order_by_ranking(rows: Vec<Memory>, ranking: &[String], scope: &MemoryScope) -> Vec<Memory> {
    let mut by_id: HashMap<String, Memory> = rows
        .into_iter()
        .filter(|m| m.belongs_to(scope) && m.is_active())
        .map(|m| (m.id.clone(), m))
        .collect();
    ranking.iter().filter_map(|id| by_id.remove(id)).collect()
}

/// Render memories as a prompt section, preserving the given order.
///
/// Empty input renders as an empty string.
pub fn format_memories(memories: &[Memory]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let mut out = String::from(MEMORY_PROMPT_HEADER);
    for memory in memories {
        out.push_str("- ");
        out.push_str(&memory.content);
        out.push('\n');
    }
    out
}
