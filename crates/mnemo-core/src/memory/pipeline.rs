//! Extraction pipeline: turn one pending batch into memory writes.
//!
//! A run loads the scope's active memories, asks the extractor for
//! add/update/none decisions, and applies them one by one. A failing action
//! is logged and counted; it never stops the rest of the batch. Errors
//! returned from [`ExtractionPipeline::process`] all happen before the first
//! write, so a retry cannot duplicate memories.

use std::collections::HashSet;
use std::sync::Arc;

use mnemo_types::error::MemoryError;
use mnemo_types::memory::{
    ActionKind, Memory, MemoryAction, MemoryScope, MemorySource, MemoryType, PendingBatch,
};

use crate::llm::box_provider::BoxLlmProvider;

use super::extractor::{ExtractionOptions, MemoryExtractor};
use super::service::MemoryService;
use super::store::MemoryRepository;

/// Per-batch tally of applied actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Applied {
    Added,
    Updated,
    Skipped,
}

pub struct ExtractionPipeline<R: MemoryRepository> {
    service: Arc<MemoryService<R>>,
    provider: Arc<BoxLlmProvider>,
    options: ExtractionOptions,
}

impl<R: MemoryRepository> ExtractionPipeline<R> {
    pub fn new(
        service: Arc<MemoryService<R>>,
        provider: Arc<BoxLlmProvider>,
        options: ExtractionOptions,
    ) -> Self {
        Self {
            service,
            provider,
            options,
        }
    }

    /// Run extraction for one batch and apply the resulting actions.
    #[tracing::instrument(
        name = "process_batch",
        skip(self, batch),
        fields(
            conversation_id = %batch.conversation_id,
            persona_id = %batch.persona_id,
            user_id = batch.user_id,
        )
    )]
    pub async fn process(&self, batch: &PendingBatch) -> Result<ExtractionReport, MemoryError> {
        let mut report = ExtractionReport::default();
        if batch.turns.is_empty() {
            return Ok(report);
        }

        let scope = batch.scope();
        let existing = self.service.active_memories(&scope).await?;
        let actions =
            MemoryExtractor::extract(&self.provider, batch, &existing, &self.options).await?;

        let mut replaceable: HashSet<String> = existing.into_iter().map(|m| m.id).collect();
        for action in actions {
            match self.apply(&scope, &mut replaceable, action).await {
                Ok(Applied::Added) => report.added += 1,
                Ok(Applied::Updated) => report.updated += 1,
                Ok(Applied::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "memory action failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            added = report.added,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "extraction batch applied"
        );
        Ok(report)
    }

    /// Apply one action. `replaceable` holds the ids an update may supersede.
    async fn apply(
        &self,
        scope: &MemoryScope,
        replaceable: &mut HashSet<String>,
        action: MemoryAction,
    ) -> Result<Applied, MemoryError> {
        if action.action == ActionKind::None {
            return Ok(Applied::Skipped);
        }
        let content = action.content.trim();
        if content.is_empty() {
            tracing::debug!(action = ?action.action, "skipping action with empty content");
            return Ok(Applied::Skipped);
        }

        let memory_type = action.memory_type.parse::<MemoryType>().unwrap_or_else(|_| {
            tracing::warn!(memory_type = %action.memory_type, "unknown memory type from LLM; using fact");
            MemoryType::Fact
        });
        let keywords = Some(action.keywords.trim().to_string());
        let memory = Memory::new(scope, memory_type, content, keywords, MemorySource::Auto);

        let target = match (action.action, action.old_memory_id.as_deref().map(str::trim)) {
            (ActionKind::Update, Some(old_id)) if replaceable.contains(old_id) => {
                Some(old_id.to_string())
            }
            (ActionKind::Update, old_id) => {
                tracing::warn!(
                    old_memory_id = old_id.unwrap_or(""),
                    "update does not reference an active memory in scope; adding instead"
                );
                None
            }
            _ => None,
        };

        match target {
            Some(old_id) => {
                // One replacement per memory, even if the model repeats the id.
                replaceable.remove(&old_id);
                self.service.supersede(&old_id, memory).await?;
                Ok(Applied::Updated)
            }
            None => {
                self.service.create(memory).await?;
                Ok(Applied::Added)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::memory::box_embedder::BoxEmbedder;
    use crate::memory::box_vector::BoxVectorIndex;
    use crate::memory::testing::{
        InMemoryRepository, KeywordEmbedder, ScriptedIndex, ScriptedLlm, memory_aged,
    };
    use mnemo_types::llm::LlmError;
    use mnemo_types::memory::MemoryStatus;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        index: Arc<ScriptedIndex>,
        llm: Arc<ScriptedLlm>,
        pipeline: ExtractionPipeline<InMemoryRepository>,
    }

    fn fixture(llm: ScriptedLlm) -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let index = Arc::new(ScriptedIndex::new());
        let llm = Arc::new(llm);
        let service = MemoryService::new(repo.clone())
            .with_embedder(BoxEmbedder::new(Arc::new(KeywordEmbedder::new())))
            .with_vector_index(BoxVectorIndex::new(index.clone()));
        let pipeline = ExtractionPipeline::new(
            Arc::new(service),
            Arc::new(BoxLlmProvider::new(llm.clone())),
            ExtractionOptions::default(),
        );
        Fixture {
            repo,
            index,
            llm,
            pipeline,
        }
    }

    fn scope() -> MemoryScope {
        MemoryScope::new("P", 1)
    }

    fn batch() -> PendingBatch {
        let mut batch = PendingBatch::new("conv", &scope());
        batch.push_turn("I switched from tea to coffee", "Noted!");
        batch
    }

    #[tokio::test]
    async fn test_update_supersedes_existing_memory() {
        let f = fixture(ScriptedLlm::new().reply(
            r#"{"actions": [{"action": "update", "old_memory_id": "mem:old", "type": "preference", "content": "drinks coffee now, used to drink tea", "keywords": "coffee"}]}"#,
        ));
        let mut old = memory_aged(&scope(), "drinks tea", 60);
        old.id = "mem:old".to_string();
        f.repo.insert(old);

        let report = f.pipeline.process(&batch()).await.unwrap();
        assert_eq!(report.updated, 1);

        let rows = f.repo.snapshot();
        let old = rows.iter().find(|m| m.id == "mem:old").unwrap();
        let new = rows.iter().find(|m| m.id != "mem:old").unwrap();
        assert_eq!(old.status, MemoryStatus::Superseded);
        assert_eq!(old.superseded_by.as_deref(), Some(new.id.as_str()));
        assert_eq!(new.status, MemoryStatus::Active);
        assert_eq!(new.source, MemorySource::Auto);
        assert_eq!(new.memory_type, MemoryType::Preference);
        assert_eq!(new.content, "drinks coffee now, used to drink tea");

        let active = f.repo.get_active_by_scope(&scope()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, new.id);

        // The existing memory was shown to the model.
        assert!(f.llm.requests()[0].messages[0].content.contains("- ID: mem:old, content: drinks tea"));
    }

    #[tokio::test]
    async fn test_add_creates_embedded_indexed_memory() {
        let f = fixture(ScriptedLlm::new().reply(
            r#"[{"action": "add", "type": "fact", "content": "likes coffee", "keywords": ["coffee"]}]"#,
        ));
        let report = f.pipeline.process(&batch()).await.unwrap();
        assert_eq!(report.added, 1);

        let rows = f.repo.snapshot();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].embedding.is_some());
        assert_eq!(rows[0].keywords.as_deref(), Some("coffee"));
        assert!(f.index.contains(&rows[0].id));
        assert_eq!(f.llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_update_outside_scope_becomes_add() {
        let f = fixture(ScriptedLlm::new().reply(
            r#"{"actions": [{"action": "update", "old_memory_id": "mem:foreign", "type": "fact", "content": "likes coffee"}]}"#,
        ));
        let mut foreign = memory_aged(&MemoryScope::new("P", 2), "likes tea", 10);
        foreign.id = "mem:foreign".to_string();
        f.repo.insert(foreign);

        let report = f.pipeline.process(&batch()).await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(f.repo.find("mem:foreign").unwrap().status, MemoryStatus::Active);
    }

    #[tokio::test]
    async fn test_invalid_actions_are_normalised() {
        let f = fixture(ScriptedLlm::new().reply(
            r#"{"actions": [
                {"action": "add", "type": "opinion", "content": "likes jazz"},
                {"action": "update", "type": "fact", "content": "works remotely"},
                {"action": "add", "type": "fact", "content": "   "},
                {"action": "none", "type": "fact", "content": "hello"}
            ]}"#,
        ));
        let report = f.pipeline.process(&batch()).await.unwrap();
        assert_eq!(
            report,
            ExtractionReport {
                added: 2,
                updated: 0,
                skipped: 2,
                failed: 0
            }
        );
        let jazz = f
            .repo
            .snapshot()
            .into_iter()
            .find(|m| m.content == "likes jazz")
            .unwrap();
        assert_eq!(jazz.memory_type, MemoryType::Fact);
    }

    #[tokio::test]
    async fn test_failed_action_does_not_stop_batch() {
        let f = fixture(ScriptedLlm::new().reply(
            r#"[{"action": "add", "type": "fact", "content": "a"}, {"action": "add", "type": "fact", "content": "b"}]"#,
        ));
        f.repo.fail_create.store(true, Ordering::SeqCst);
        let report = f.pipeline.process(&batch()).await.unwrap();
        assert_eq!(report.failed, 2);
    }

    #[tokio::test]
    async fn test_parse_failure_aborts_batch() {
        let f = fixture(ScriptedLlm::new().reply("I could not find anything."));
        let err = f.pipeline.process(&batch()).await.unwrap_err();
        assert!(matches!(err, MemoryError::ExtractionParse(_)));
        assert!(!err.is_transient());
        assert!(f.repo.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_is_returned() {
        let f = fixture(ScriptedLlm::new().fail(LlmError::RateLimited {
            retry_after_ms: None,
        }));
        let err = f.pipeline.process(&batch()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
