//! Long-term memory engine for mnemo.
//!
//! Ports implemented by the infrastructure layer (`MemoryRepository`,
//! `PendingCache`, `Embedder`, `VectorIndex`) and the logic composed from
//! them: the pending-turn buffer, LLM-driven extraction with a bounded worker
//! pool, similarity-ranked retrieval with graceful degradation, index
//! reconciliation, and the `MemoryEngine` façade that ties it together.

pub mod box_embedder;
pub mod box_vector;
pub mod buffer;
pub mod cache;
pub mod embedder;
pub mod engine;
pub mod extractor;
pub mod pipeline;
pub mod reconcile;
pub mod retrieval;
pub mod service;
pub mod similarity;
pub mod store;
pub mod vector;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
