//! Completion exchange with the extraction model.
//!
//! Extraction sends one non-streaming request per pending batch: a system
//! prompt describing the add/update/none protocol and a single user message
//! holding the existing memories and the transcript.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// One completion call. An empty `model` lets the provider use its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Sent ahead of `messages` as a system turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// The model's reply; `content` is the raw text the extractor parses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Failures talking to the extraction model.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Upstream 5xx or transport failure.
    #[error("extraction model error: {message}")]
    Provider { message: String },

    #[error("could not decode model response: {0}")]
    Deserialization(String),

    #[error("extraction model rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("extraction model overloaded: {0}")]
    Overloaded(String),

    #[error("extraction model rejected the API key")]
    AuthenticationFailed,

    #[error("extraction request timed out after {0}s")]
    Timeout(u64),

    #[error("extraction request rejected: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// Worth retrying the same batch later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Provider { .. }
                | LlmError::RateLimited { .. }
                | LlmError::Overloaded(_)
                | LlmError::Timeout(_)
        )
    }
}
