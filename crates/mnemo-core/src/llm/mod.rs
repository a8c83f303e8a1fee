//! LLM provider abstraction used by memory extraction.

pub mod box_provider;
pub mod provider;
