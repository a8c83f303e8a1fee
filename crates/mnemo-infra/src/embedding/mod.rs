//! Embedding providers.

pub mod http;
