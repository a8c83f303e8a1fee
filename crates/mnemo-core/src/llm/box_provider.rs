//! Type-erased extraction model.
//!
//! `LlmProvider::complete` returns an opaque future, so the trait cannot be
//! a trait object. The engine picks its provider at startup from config,
//! which needs one: `CompleteDyn` boxes the future and `BoxLlmProvider`
//! hides the box.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use mnemo_types::llm::{CompletionRequest, CompletionResponse, LlmError};

use super::provider::LlmProvider;

type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + 'a>>;

trait CompleteDyn: Send + Sync {
    fn provider_name(&self) -> &str;

    fn complete_dyn<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a>;
}

impl<P: LlmProvider> CompleteDyn for P {
    fn provider_name(&self) -> &str {
        self.name()
    }

    fn complete_dyn<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
        Box::pin(self.complete(request))
    }
}

pub struct BoxLlmProvider {
    inner: Box<dyn CompleteDyn>,
}

impl BoxLlmProvider {
    pub fn new<P: LlmProvider + 'static>(provider: P) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.provider_name()
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.inner.complete_dyn(request).await
    }
}

impl fmt::Debug for BoxLlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxLlmProvider")
            .field("provider", &self.name())
            .finish()
    }
}
