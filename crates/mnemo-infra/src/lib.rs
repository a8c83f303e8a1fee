//! Infrastructure layer for mnemo.
//!
//! Contains implementations of the port traits defined in `mnemo-core`:
//! SQLite storage for memory rows and pending batches, a LanceDB vector
//! index, the HTTP embedding client, the OpenAI-compatible extraction model
//! and the TOML configuration loader.

pub mod config;
pub mod embedding;
pub mod llm;
pub mod sqlite;
pub mod vector;
