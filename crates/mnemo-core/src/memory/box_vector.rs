//! BoxVectorIndex -- object-safe dynamic dispatch wrapper for VectorIndex.
//!
//! 1. Define an object-safe `VectorIndexDyn` trait with boxed futures
//! 2. Blanket-impl `VectorIndexDyn` for all `T: VectorIndex`
//! 3. `BoxVectorIndex` wraps `Box<dyn VectorIndexDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use mnemo_types::error::VectorIndexError;
use mnemo_types::memory::MemoryScope;

use super::vector::VectorIndex;

/// Object-safe version of [`VectorIndex`] with boxed futures.
pub trait VectorIndexDyn: Send + Sync {
    fn ensure_ready_boxed(
        &self,
        dimension: usize,
    ) -> Pin<Box<dyn Future<Output = Result<(), VectorIndexError>> + Send + '_>>;

    fn upsert_boxed<'a>(
        &'a self,
        id: &'a str,
        scope: &'a MemoryScope,
        vector: &'a [f32],
    ) -> Pin<Box<dyn Future<Output = Result<(), VectorIndexError>> + Send + 'a>>;

    fn delete_boxed<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), VectorIndexError>> + Send + 'a>>;

    fn search_boxed<'a>(
        &'a self,
        scope: &'a MemoryScope,
        query: &'a [f32],
        top_k: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, VectorIndexError>> + Send + 'a>>;
}

/// Blanket implementation: any `VectorIndex` automatically implements `VectorIndexDyn`.
impl<T: VectorIndex> VectorIndexDyn for T {
    fn ensure_ready_boxed(
        &self,
        dimension: usize,
    ) -> Pin<Box<dyn Future<Output = Result<(), VectorIndexError>> + Send + '_>> {
        Box::pin(self.ensure_ready(dimension))
    }

    fn upsert_boxed<'a>(
        &'a self,
        id: &'a str,
        scope: &'a MemoryScope,
        vector: &'a [f32],
    ) -> Pin<Box<dyn Future<Output = Result<(), VectorIndexError>> + Send + 'a>> {
        Box::pin(self.upsert(id, scope, vector))
    }

    fn delete_boxed<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), VectorIndexError>> + Send + 'a>> {
        Box::pin(self.delete(id))
    }

    fn search_boxed<'a>(
        &'a self,
        scope: &'a MemoryScope,
        query: &'a [f32],
        top_k: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, VectorIndexError>> + Send + 'a>> {
        Box::pin(self.search(scope, query, top_k))
    }
}

/// Type-erased vector index for runtime backend selection.
pub struct BoxVectorIndex {
    inner: Box<dyn VectorIndexDyn + Send + Sync>,
}

impl BoxVectorIndex {
    /// Wrap a concrete `VectorIndex` in a type-erased box.
    pub fn new<T: VectorIndex + 'static>(index: T) -> Self {
        Self {
            inner: Box::new(index),
        }
    }

    pub async fn ensure_ready(&self, dimension: usize) -> Result<(), VectorIndexError> {
        self.inner.ensure_ready_boxed(dimension).await
    }

    pub async fn upsert(
        &self,
        id: &str,
        scope: &MemoryScope,
        vector: &[f32],
    ) -> Result<(), VectorIndexError> {
        self.inner.upsert_boxed(id, scope, vector).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), VectorIndexError> {
        self.inner.delete_boxed(id).await
    }

    pub async fn search(
        &self,
        scope: &MemoryScope,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<String>, VectorIndexError> {
        self.inner.search_boxed(scope, query, top_k).await
    }
}
