use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// Errors from repository operations (used by trait definitions in mnemo-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from the embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Key or model missing. Callers degrade instead of failing.
    #[error("embedding provider not configured: {0}")]
    NotConfigured(String),

    #[error("invalid embedding input: {0}")]
    InvalidInput(String),

    #[error("embedding transport error: {0}")]
    Transport(String),

    #[error("embedding endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    Response(String),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Transport(_) => true,
            EmbeddingError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors from the vector index.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    /// The stored collection was built for a different vector length.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid index entry identity: {0}")]
    InvalidIdentity(String),

    #[error("vector index backend error: {0}")]
    Backend(String),
}

/// Engine-level error surfaced by `MemoryEngine` and the extraction pipeline.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("memory not found: {0}")]
    NotFound(String),

    #[error("memory {0} belongs to another persona or user")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to parse extraction output: {0}")]
    ExtractionParse(String),

    #[error("extraction queue unavailable: {0}")]
    QueueUnavailable(String),
}

impl MemoryError {
    /// Transport failures, timeouts, rate limits and overloads.
    pub fn is_transient(&self) -> bool {
        match self {
            MemoryError::Timeout(_) => true,
            MemoryError::Embedding(e) => e.is_transient(),
            MemoryError::Llm(e) => e.is_transient(),
            MemoryError::Repository(RepositoryError::Connection) => true,
            _ => false,
        }
    }
}
