//! Shared domain types for mnemo.
//!
//! This crate contains the types used across the memory engine: memories,
//! pending chat batches, extraction actions, configuration, LLM request and
//! response shapes, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
