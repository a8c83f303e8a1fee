//! CLI command definitions for the `mnemo` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod chat;
pub mod memory;
pub mod reconcile;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Long-term memory for AI personas.
#[derive(Parser)]
#[command(name = "mnemo", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage memories (add, list, update, delete, search).
    Memory {
        #[command(subcommand)]
        action: memory::MemoryCommand,
    },

    /// Feed chat turns into the extraction buffer.
    Chat {
        #[command(subcommand)]
        action: chat::ChatCommand,
    },

    /// Repair embeddings and vector index entries from stored memories.
    Reconcile {
        #[command(flatten)]
        scope: OptionalScopeArgs,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Persona and user that own the memories.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Persona id.
    #[arg(long, short = 'p')]
    pub persona: String,

    /// User id.
    #[arg(long, short = 'u')]
    pub user: i64,
}

#[derive(Args, Debug, Clone)]
pub struct OptionalScopeArgs {
    /// Limit to one persona (requires --user).
    #[arg(long, short = 'p', requires = "user")]
    pub persona: Option<String>,

    /// Limit to one user (requires --persona).
    #[arg(long, short = 'u', requires = "persona")]
    pub user: Option<i64>,
}

/// Truncate `text` to at most `max` characters, marking the cut.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max.saturating_sub(3)) {
        Some((cut, _)) if text.chars().count() > max => format!("{}...", &text[..cut]),
        _ => text.to_string(),
    }
}
