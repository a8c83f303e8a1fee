//! Embedder trait for text-to-vector conversion.
//!
//! Implementations (e.g., the HTTP embeddings client) live in mnemo-infra.

use mnemo_types::error::EmbeddingError;

/// Trait for converting text into an embedding vector.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    ///
    /// Fails with `NotConfigured` when the provider lacks a key or model,
    /// `Transport`/`Status` on network or HTTP failure, and `Response` when
    /// the payload holds no non-empty vector.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, EmbeddingError>> + Send;

    /// The model name used for embeddings (e.g., "text-embedding-3-small").
    fn model_name(&self) -> &str;

    /// The requested dimensionality of the output vectors.
    fn dimension(&self) -> usize;
}
