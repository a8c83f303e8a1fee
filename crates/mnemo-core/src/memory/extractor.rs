//! LLM-driven memory extraction.
//!
//! `MemoryExtractor` renders a pending batch into a numbered transcript,
//! pairs it with the scope's current active memories, and asks the model to
//! classify every durable fact about the user as `add`, `update` (merging
//! into exactly one existing memory) or `none`.
//!
//! Unlike retrieval, a malformed model reply is an error: the batch is
//! reported as failed and not retried.

use std::fmt::Write as _;
use std::time::Duration;

use serde::Deserialize;

use mnemo_types::config::ExtractionConfig;
use mnemo_types::error::MemoryError;
use mnemo_types::llm::{CompletionRequest, LlmError, Message};
use mnemo_types::memory::{Memory, MemoryAction, PendingBatch};

use crate::llm::box_provider::BoxLlmProvider;

/// System prompt for the extraction call.
const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a memory manager for a conversational assistant. Analyse the conversation and update what is remembered about the user.

Task:
1. From [New conversation], extract important, durable and objective information about the user.
2. Compare each piece of information with [Existing memories] and classify it as:
   - "add": no existing memory covers it.
   - "update": it conflicts with or supplements exactly one existing memory. Write the merged, concise content and give that memory's id as "old_memory_id".
   - "none": it is already remembered or not worth keeping.
3. Each memory has a "type": one of "fact", "preference", "event", "emotion", "relationship".
4. "keywords" is a short comma-separated list of tags.

Output JSON only:
{
  "actions": [
    {"action": "add", "type": "fact", "content": "...", "keywords": "..."},
    {"action": "update", "old_memory_id": "mem:...", "type": "preference", "content": "merged content", "keywords": "..."}
  ]
}

If there is nothing to remember, return {"actions": []}"#;

/// Model call settings for extraction.
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Empty means the provider's default model.
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
}

impl From<&ExtractionConfig> for ExtractionOptions {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self::from(&ExtractionConfig::default())
    }
}

/// Accepted reply shapes: `{"actions": [...]}` or a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawActions {
    Wrapped { actions: Vec<MemoryAction> },
    Bare(Vec<MemoryAction>),
}

/// Stateless helper around the extraction prompt and its reply.
pub struct MemoryExtractor;

impl MemoryExtractor {
    /// Render turns in append order, rounds numbered from 1.
    pub fn render_transcript(batch: &PendingBatch) -> String {
        let mut out = String::new();
        for (i, turn) in batch.turns.iter().enumerate() {
            let _ = write!(
                out,
                "--- round {} ---\nuser: {}\nassistant: {}\n\n",
                i + 1,
                turn.user_message,
                turn.assistant_message
            );
        }
        out
    }

    /// Build the completion request for one batch.
    pub fn build_request(
        batch: &PendingBatch,
        existing: &[Memory],
        options: &ExtractionOptions,
    ) -> CompletionRequest {
        let mut existing_text = String::new();
        for memory in existing {
            let _ = writeln!(existing_text, "- ID: {}, content: {}", memory.id, memory.content);
        }
        let user_prompt = format!(
            "[Existing memories]\n{existing_text}\n\n[New conversation]\n{}",
            Self::render_transcript(batch)
        );

        CompletionRequest {
            model: options.model.clone(),
            messages: vec![Message::user(user_prompt)],
            system: Some(EXTRACTION_SYSTEM_PROMPT.to_string()),
            max_tokens: options.max_tokens,
            temperature: Some(options.temperature),
        }
    }

    /// Parse a model reply, tolerating surrounding code fences.
    pub fn parse_actions(raw: &str) -> Result<Vec<MemoryAction>, MemoryError> {
        let content = strip_code_fence(raw);
        match serde_json::from_str::<RawActions>(content) {
            Ok(RawActions::Wrapped { actions }) | Ok(RawActions::Bare(actions)) => Ok(actions),
            Err(e) => {
                let preview: String = content.chars().take(200).collect();
                tracing::warn!(
                    error = %e,
                    content_preview = %preview,
                    "failed to parse memory extraction JSON"
                );
                Err(MemoryError::ExtractionParse(e.to_string()))
            }
        }
    }

    /// Ask the model for add/update/none decisions on a batch.
    #[tracing::instrument(
        name = "extract_memory_actions",
        skip(provider, batch, existing, options),
        fields(
            conversation_id = %batch.conversation_id,
            persona_id = %batch.persona_id,
            user_id = batch.user_id,
            rounds = batch.turns.len(),
            existing = existing.len(),
        )
    )]
    pub async fn extract(
        provider: &BoxLlmProvider,
        batch: &PendingBatch,
        existing: &[Memory],
        options: &ExtractionOptions,
    ) -> Result<Vec<MemoryAction>, MemoryError> {
        if batch.turns.is_empty() {
            return Ok(Vec::new());
        }

        let request = Self::build_request(batch, existing, options);
        let response = match tokio::time::timeout(options.timeout, provider.complete(&request)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(LlmError::Timeout(options.timeout.as_secs()).into()),
        };

        let actions = Self::parse_actions(&response.content)?;
        tracing::debug!(count = actions.len(), provider = provider.name(), "extraction actions parsed");
        Ok(actions)
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let mut content = raw.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim()
}
