//! Memory engine logic and port definitions for mnemo.
//!
//! This crate defines the "ports" (storage, index, embedding and LLM traits)
//! that the infrastructure layer implements, plus the engine built on them:
//! the pending-turn buffer, the extraction pipeline and its worker pool, and
//! similarity-ranked retrieval. It depends only on `mnemo-types` -- never on
//! `mnemo-infra` or any database/IO crate.

pub mod llm;
pub mod memory;
