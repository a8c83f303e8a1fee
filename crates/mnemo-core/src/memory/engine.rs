//! `MemoryEngine` -- the façade used by chat handling and manual memory
//! management.
//!
//! Holds explicit references to the repository, pending cache, embedder,
//! vector index and extraction model, all injected at construction. Owns the
//! extraction worker pool and the optional periodic reconciliation task,
//! both stopped by [`MemoryEngine::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mnemo_types::config::MemoryConfig;
use mnemo_types::error::MemoryError;
use mnemo_types::memory::{Memory, MemoryScope, MemorySource, MemoryType, PendingBatch};

use crate::llm::box_provider::BoxLlmProvider;

use super::box_embedder::BoxEmbedder;
use super::box_vector::BoxVectorIndex;
use super::buffer::{AccumulateOutcome, PendingBuffer};
use super::cache::PendingCache;
use super::pipeline::ExtractionPipeline;
use super::reconcile::{ReconcileReport, Reconciler};
use super::retrieval::format_memories;
use super::service::MemoryService;
use super::store::MemoryRepository;
use super::worker::ExtractionWorkerPool;

/// Returned by [`MemoryEngine::retrieve_for_prompt`] when nothing was found.
pub const NO_RELEVANT_MEMORIES: &str = "No relevant memories were found.";

/// Everything the engine needs, injected by the caller.
pub struct EngineComponents<R, C> {
    pub repository: Arc<R>,
    pub cache: Arc<C>,
    /// `None` disables semantic ranking.
    pub embedder: Option<BoxEmbedder>,
    /// `None` makes retrieval rely on the in-process scan.
    pub vector_index: Option<BoxVectorIndex>,
    /// `None` disables turn buffering and extraction.
    pub llm: Option<BoxLlmProvider>,
}

pub struct MemoryEngine<R: MemoryRepository + 'static, C: PendingCache + 'static> {
    service: Arc<MemoryService<R>>,
    cache: Arc<C>,
    buffer: Option<PendingBuffer<C>>,
    workers: Option<Arc<ExtractionWorkerPool>>,
    reconciler: Arc<Reconciler<R>>,
    default_top_k: usize,
    cancel: CancellationToken,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

fn scope_of(persona_id: &str, user_id: i64) -> Result<MemoryScope, MemoryError> {
    let persona_id = persona_id.trim();
    if persona_id.is_empty() {
        return Err(MemoryError::InvalidInput("persona id must not be empty".to_string()));
    }
    Ok(MemoryScope::new(persona_id, user_id))
}

impl<R: MemoryRepository + 'static, C: PendingCache + 'static> MemoryEngine<R, C> {
    /// Wire the engine and start its background workers.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(components: EngineComponents<R, C>, config: &MemoryConfig) -> Self {
        let mut service =
            MemoryService::new(components.repository).with_timeouts((&config.retrieval).into());
        if let Some(embedder) = components.embedder {
            service = service.with_embedder(embedder);
        }
        if let Some(index) = components.vector_index {
            service = service.with_vector_index(index);
        }
        let service = Arc::new(service);

        let (buffer, workers) = match components.llm {
            Some(llm) => {
                let pipeline = Arc::new(ExtractionPipeline::new(
                    service.clone(),
                    Arc::new(llm),
                    (&config.extraction).into(),
                ));
                let pool = Arc::new(ExtractionWorkerPool::start(
                    pipeline,
                    (&config.extraction).into(),
                ));
                let buffer = PendingBuffer::new(
                    components.cache.clone(),
                    pool.clone(),
                    (&config.buffer).into(),
                );
                (Some(buffer), Some(pool))
            }
            None => {
                tracing::info!("extraction model not configured; chat turns will not be buffered");
                (None, None)
            }
        };

        let engine = Self {
            reconciler: Arc::new(Reconciler::new(service.clone())),
            service,
            cache: components.cache,
            buffer,
            workers,
            default_top_k: config.retrieval.default_top_k.max(1),
            cancel: CancellationToken::new(),
            background: std::sync::Mutex::new(Vec::new()),
        };

        if config.reconcile.interval_secs > 0 {
            engine.spawn_reconcile_task(Duration::from_secs(config.reconcile.interval_secs));
        }
        engine
    }

    pub fn service(&self) -> &MemoryService<R> {
        &self.service
    }

    pub fn extraction_enabled(&self) -> bool {
        self.buffer.is_some()
    }

    // ---- Chat-handling surface ----

    /// Buffer one chat turn; hands the batch to extraction at the threshold.
    pub async fn accumulate_turn(
        &self,
        conversation_id: &str,
        persona_id: &str,
        user_id: i64,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<AccumulateOutcome, MemoryError> {
        let scope = scope_of(persona_id, user_id)?;
        let Some(buffer) = &self.buffer else {
            return Ok(AccumulateOutcome::Disabled);
        };
        buffer
            .accumulate(conversation_id, &scope, user_text, assistant_text)
            .await
    }

    /// Current pending batch for a conversation.
    pub async fn pending_batch(&self, conversation_id: &str) -> Result<Option<PendingBatch>, MemoryError> {
        match &self.buffer {
            Some(buffer) => buffer.peek(conversation_id).await,
            None => Ok(None),
        }
    }

    /// Ranked active memories for the scope. See [`MemoryService::retrieve`].
    pub async fn retrieve(
        &self,
        persona_id: &str,
        user_id: i64,
        query: &str,
        top_k: i64,
    ) -> Result<Vec<Memory>, MemoryError> {
        let scope = scope_of(persona_id, user_id)?;
        let outcome = self.service.retrieve(&scope, query, top_k).await?;
        self.service.record_hits(&outcome.memories).await;
        Ok(outcome.memories)
    }

    /// Retrieve and format memories for prompt injection.
    ///
    /// `top_k <= 0` uses the configured default. Never fails: problems are
    /// logged and reported as "nothing found".
    pub async fn retrieve_for_prompt(
        &self,
        persona_id: &str,
        user_id: i64,
        query: &str,
        top_k: i64,
    ) -> String {
        let top_k = if top_k <= 0 {
            self.default_top_k as i64
        } else {
            top_k
        };
        match self.retrieve(persona_id, user_id, query, top_k).await {
            Ok(memories) => {
                let formatted = format_memories(&memories);
                let formatted = formatted.trim();
                if formatted.is_empty() {
                    NO_RELEVANT_MEMORIES.to_string()
                } else {
                    formatted.to_string()
                }
            }
            Err(e) => {
                tracing::warn!(persona_id, user_id, error = %e, "memory retrieval failed");
                NO_RELEVANT_MEMORIES.to_string()
            }
        }
    }

    /// Render memories for a prompt, in the order given.
    pub fn format(&self, memories: &[Memory]) -> String {
        format_memories(memories)
    }

    // ---- Manual memory management ----

    pub async fn create_memory(
        &self,
        persona_id: &str,
        user_id: i64,
        memory_type: MemoryType,
        content: &str,
        keywords: Option<String>,
    ) -> Result<Memory, MemoryError> {
        let scope = scope_of(persona_id, user_id)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::InvalidInput("content must not be empty".to_string()));
        }
        let memory = Memory::new(&scope, memory_type, content, keywords, MemorySource::Manual);
        self.service.create(memory).await
    }

    pub async fn update_memory(
        &self,
        persona_id: &str,
        user_id: i64,
        id: &str,
        content: &str,
        keywords: Option<String>,
    ) -> Result<Memory, MemoryError> {
        let scope = scope_of(persona_id, user_id)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::InvalidInput("content must not be empty".to_string()));
        }
        self.service.update_content(&scope, id, content, keywords).await
    }

    pub async fn delete_memory(&self, persona_id: &str, user_id: i64, id: &str) -> Result<(), MemoryError> {
        let scope = scope_of(persona_id, user_id)?;
        self.service.delete(&scope, id).await
    }

    pub async fn get_memory(&self, persona_id: &str, user_id: i64, id: &str) -> Result<Memory, MemoryError> {
        let scope = scope_of(persona_id, user_id)?;
        self.service.get_owned(&scope, id).await
    }

    /// Memories for a scope, newest first; superseded rows only on request.
    pub async fn list_memories(
        &self,
        persona_id: &str,
        user_id: i64,
        include_superseded: bool,
    ) -> Result<Vec<Memory>, MemoryError> {
        let scope = scope_of(persona_id, user_id)?;
        if include_superseded {
            self.service.all_memories(&scope).await
        } else {
            self.service.active_memories(&scope).await
        }
    }

    // ---- Maintenance ----

    /// Reconcile the index for every scope, or for one persona/user pair,
    /// and purge expired pending batches.
    pub async fn reconcile(&self, scope: Option<(&str, i64)>) -> Result<ReconcileReport, MemoryError> {
        let mut report = match scope {
            Some((persona_id, user_id)) => {
                self.reconciler
                    .reconcile_scope(&scope_of(persona_id, user_id)?)
                    .await?
            }
            None => self.reconciler.reconcile_all().await?,
        };
        report.expired_batches = purge_expired(self.cache.as_ref()).await;
        Ok(report)
    }

    fn spawn_reconcile_task(&self, interval: Duration) {
        let reconciler = self.reconciler.clone();
        let cache = self.cache.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = reconciler.reconcile_all().await {
                    tracing::warn!(error = %e, "periodic reconciliation failed");
                }
                purge_expired(cache.as_ref()).await;
            }
        });
        match self.background.lock() {
            Ok(mut handles) => handles.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
        tracing::debug!(interval_secs = interval.as_secs(), "periodic reconciliation scheduled");
    }

    /// Stop background tasks. Batches already accepted for extraction are
    /// processed before this returns.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(workers) = &self.workers {
            workers.shutdown().await;
        }
        let handles = match self.background.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task panicked");
            }
        }
    }
}

async fn purge_expired<C: PendingCache>(cache: &C) -> u64 {
    match cache.purge_expired().await {
        Ok(count) => {
            if count > 0 {
                tracing::info!(count, "expired pending batches purged");
            }
            count
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to purge expired pending batches");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::{
        InMemoryCache, InMemoryRepository, KeywordEmbedder, ScriptedIndex, ScriptedLlm,
    };
    use mnemo_types::memory::MemoryStatus;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        index: Arc<ScriptedIndex>,
        engine: MemoryEngine<InMemoryRepository, InMemoryCache>,
    }

    fn config(threshold: u32) -> MemoryConfig {
        let mut config = MemoryConfig::default();
        config.buffer.extract_threshold = threshold;
        config.extraction.workers = 1;
        config.extraction.backoff_base_ms = 1;
        config
    }

    fn fixture(llm: Option<ScriptedLlm>, threshold: u32) -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let index = Arc::new(ScriptedIndex::new());
        let engine = MemoryEngine::start(
            EngineComponents {
                repository: repo.clone(),
                cache: Arc::new(InMemoryCache::new()),
                embedder: Some(BoxEmbedder::new(Arc::new(KeywordEmbedder::new()))),
                vector_index: Some(BoxVectorIndex::new(index.clone())),
                llm: llm.map(|llm| BoxLlmProvider::new(Arc::new(llm))),
            },
            &config(threshold),
        );
        Fixture {
            repo,
            index,
            engine,
        }
    }

    #[tokio::test]
    async fn test_turns_flow_into_retrievable_memories() {
        let f = fixture(
            Some(ScriptedLlm::new().reply(
                r#"{"actions": [{"action": "add", "type": "preference", "content": "likes coffee", "keywords": "coffee"}]}"#,
            )),
            2,
        );

        let first = f
            .engine
            .accumulate_turn("conv", "P", 1, "I love coffee", "Good to know")
            .await
            .unwrap();
        assert_eq!(first, AccumulateOutcome::Buffered { round_count: 1 });
        let second = f
            .engine
            .accumulate_turn("conv", "P", 1, "Espresso especially", "Noted")
            .await
            .unwrap();
        assert_eq!(second, AccumulateOutcome::HandedOff { round_count: 2 });
        assert!(f.engine.pending_batch("conv").await.unwrap().is_none());

        f.engine.shutdown().await;

        let memories = f.engine.retrieve("P", 1, "what does the user drink", 3).await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "likes coffee");
        assert_eq!(f.repo.find(&memories[0].id).unwrap().hit_count, 1);

        let text = f.engine.retrieve_for_prompt("P", 1, "drink", 0).await;
        assert_eq!(text, "## What you know about the user:\n- likes coffee");
    }

    #[tokio::test]
    async fn test_accumulate_without_llm_is_disabled() {
        let f = fixture(None, 2);
        assert!(!f.engine.extraction_enabled());
        let outcome = f.engine.accumulate_turn("conv", "P", 1, "hi", "hello").await.unwrap();
        assert_eq!(outcome, AccumulateOutcome::Disabled);
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_retrieve_for_prompt_with_nothing_found() {
        let f = fixture(None, 10);
        let text = f.engine.retrieve_for_prompt("P", 1, "anything", 5).await;
        assert_eq!(text, NO_RELEVANT_MEMORIES);
    }

    #[tokio::test]
    async fn test_manual_memory_lifecycle() {
        let f = fixture(None, 10);
        let memory = f
            .engine
            .create_memory("P", 1, MemoryType::Fact, "has a dog", Some("pets".to_string()))
            .await
            .unwrap();
        assert_eq!(memory.source, MemorySource::Manual);
        assert!(f.index.contains(&memory.id));

        assert!(matches!(
            f.engine.update_memory("P", 2, &memory.id, "has a cat", None).await,
            Err(MemoryError::Forbidden(_))
        ));
        assert!(matches!(
            f.engine.delete_memory("Q", 1, &memory.id).await,
            Err(MemoryError::Forbidden(_))
        ));

        let updated = f
            .engine
            .update_memory("P", 1, &memory.id, "has a cat", None)
            .await
            .unwrap();
        assert_eq!(updated.content, "has a cat");
        assert_eq!(updated.keywords.as_deref(), Some("pets"));

        f.engine.delete_memory("P", 1, &memory.id).await.unwrap();
        assert!(f.engine.list_memories("P", 1, true).await.unwrap().is_empty());
        assert!(!f.index.contains(&memory.id));
    }

    #[tokio::test]
    async fn test_list_memories_includes_superseded_on_request() {
        let f = fixture(None, 10);
        let old = f
            .engine
            .create_memory("P", 1, MemoryType::Fact, "drinks tea", None)
            .await
            .unwrap();
        let replacement = Memory::new(
            &MemoryScope::new("P", 1),
            MemoryType::Fact,
            "drinks coffee",
            None,
            MemorySource::Auto,
        );
        f.engine.service().supersede(&old.id, replacement).await.unwrap();

        let active = f.engine.list_memories("P", 1, false).await.unwrap();
        assert_eq!(active.len(), 1);
        let all = f.engine.list_memories("P", 1, true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|m| m.status == MemoryStatus::Superseded));
    }

    #[tokio::test]
    async fn test_manual_input_validation() {
        let f = fixture(None, 10);
        assert!(matches!(
            f.engine.create_memory("P", 1, MemoryType::Fact, "  ", None).await,
            Err(MemoryError::InvalidInput(_))
        ));
        assert!(matches!(
            f.engine.create_memory(" ", 1, MemoryType::Fact, "x", None).await,
            Err(MemoryError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_reindexes_rows() {
        let f = fixture(None, 10);
        let memory = Memory::new(
            &MemoryScope::new("P", 1),
            MemoryType::Fact,
            "works remotely",
            None,
            MemorySource::Manual,
        );
        f.repo.insert(memory.clone());

        let report = f.engine.reconcile(None).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert!(f.index.contains(&memory.id));

        let scoped = f.engine.reconcile(Some(("P", 1))).await.unwrap();
        assert_eq!(scoped.scopes, 1);
        assert_eq!(scoped.embedded, 0);
    }
    #[tokio::test(start_paused = true)]
    async fn test_periodic_reconcile_runs_and_stops_on_shutdown() {
        let repo = Arc::new(InMemoryRepository::new());
        let index = Arc::new(ScriptedIndex::new());
        let mut config = config(10);
        config.reconcile.interval_secs = 60;
        let engine = MemoryEngine::start(
            EngineComponents {
                repository: repo.clone(),
                cache: Arc::new(InMemoryCache::new()),
                embedder: Some(BoxEmbedder::new(Arc::new(KeywordEmbedder::new()))),
                vector_index: Some(BoxVectorIndex::new(index.clone())),
                llm: None,
            },
            &config,
        );
        let memory = Memory::new(
            &MemoryScope::new("P", 1),
            MemoryType::Fact,
            "has a dog",
            None,
            MemorySource::Manual,
        );
        repo.insert(memory.clone());

        for _ in 0..180 {
            if index.contains(&memory.id) {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(index.contains(&memory.id));

        tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
            .await
            .unwrap();
        assert!(engine.background.lock().unwrap().is_empty());
    }
}
