//! Type-erased [`Embedder`], built the same way as `BoxLlmProvider`.

use std::future::Future;
use std::pin::Pin;

use mnemo_types::error::EmbeddingError;

use super::embedder::Embedder;

type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbeddingError>> + Send + 'a>>;

trait EmbedDyn: Send + Sync {
    fn embed_dyn<'a>(&'a self, text: &'a str) -> EmbedFuture<'a>;

    fn model(&self) -> &str;

    fn configured_dimension(&self) -> usize;
}

impl<E: Embedder> EmbedDyn for E {
    fn embed_dyn<'a>(&'a self, text: &'a str) -> EmbedFuture<'a> {
        Box::pin(self.embed(text))
    }

    fn model(&self) -> &str {
        self.model_name()
    }

    fn configured_dimension(&self) -> usize {
        self.dimension()
    }
}

pub struct BoxEmbedder {
    inner: Box<dyn EmbedDyn>,
}

impl BoxEmbedder {
    pub fn new<E: Embedder + 'static>(embedder: E) -> Self {
        Self {
            inner: Box::new(embedder),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.inner.embed_dyn(text).await
    }

    pub fn model_name(&self) -> &str {
        self.inner.model()
    }

    /// Dimension requested from the provider; 0 when left to the model.
    pub fn dimension(&self) -> usize {
        self.inner.configured_dimension()
    }
}
