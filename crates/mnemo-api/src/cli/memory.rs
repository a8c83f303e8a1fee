//! Memory management commands: add, list, update, delete, search.
//!
//! The manual counterpart to background extraction. Every command is scoped
//! to a persona and user; ids owned by another scope are rejected.

use anyhow::{Result, anyhow};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;

use mnemo_types::memory::{Memory, MemorySource, MemoryStatus, MemoryType};

use super::{ScopeArgs, truncate};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// Store a memory by hand.
    Add {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Memory text.
        content: String,

        /// fact, preference, event, emotion or relationship.
        #[arg(long = "type", short = 't', default_value = "fact")]
        memory_type: String,

        /// Free-text tags.
        #[arg(long, short = 'k')]
        keywords: Option<String>,
    },

    /// List memories, newest first.
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Include superseded memories.
        #[arg(long)]
        all: bool,
    },

    /// Replace a memory's text.
    Update {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Memory id (mem:...).
        id: String,

        /// New memory text.
        content: String,

        /// New tags; existing tags are kept when omitted.
        #[arg(long, short = 'k')]
        keywords: Option<String>,
    },

    /// Delete a memory.
    #[command(alias = "rm")]
    Delete {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Memory id (mem:...).
        id: String,

        /// Skip the confirmation prompt.
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Retrieve the memories most relevant to a query.
    Search {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Query text.
        query: String,

        /// Maximum number of memories (0 uses the configured default).
        #[arg(long, short = 'n', default_value_t = 0)]
        top_k: i64,

        /// Print the prompt block instead of a table.
        #[arg(long)]
        prompt: bool,
    },
}

pub async fn run(state: &AppState, action: MemoryCommand, json: bool) -> Result<()> {
    match action {
        MemoryCommand::Add {
            scope,
            content,
            memory_type,
            keywords,
        } => add_memory(state, &scope, &content, &memory_type, keywords, json).await,
        MemoryCommand::List { scope, all } => list_memories(state, &scope, all, json).await,
        MemoryCommand::Update {
            scope,
            id,
            content,
            keywords,
        } => update_memory(state, &scope, &id, &content, keywords, json).await,
        MemoryCommand::Delete { scope, id, force } => {
            delete_memory(state, &scope, &id, force, json).await
        }
        MemoryCommand::Search {
            scope,
            query,
            top_k,
            prompt,
        } => search_memories(state, &scope, &query, top_k, prompt, json).await,
    }
}

async fn add_memory(
    state: &AppState,
    scope: &ScopeArgs,
    content: &str,
    memory_type: &str,
    keywords: Option<String>,
    json: bool,
) -> Result<()> {
    let memory_type: MemoryType = memory_type.parse().map_err(|e: String| anyhow!(e))?;
    let memory = state
        .engine
        .create_memory(&scope.persona, scope.user, memory_type, content, keywords)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&memory)?);
    } else {
        println!(
            "  {} Memory {} saved for {}/{}",
            style("*").green().bold(),
            style(&memory.id).dim(),
            style(&scope.persona).cyan(),
            scope.user
        );
        println!("  {}", style(&memory.content).dim());
    }
    Ok(())
}

async fn list_memories(state: &AppState, scope: &ScopeArgs, all: bool, json: bool) -> Result<()> {
    let memories = state
        .engine
        .list_memories(&scope.persona, scope.user, all)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&memories)?);
        return Ok(());
    }

    if memories.is_empty() {
        println!();
        println!(
            "  {} No memories for {}/{}.",
            style("i").blue().bold(),
            style(&scope.persona).cyan(),
            scope.user
        );
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  Memories for {}/{}",
        style(&scope.persona).cyan().bold(),
        scope.user
    );
    println!();
    println!("{}", memory_table(&memories));
    println!();
    println!(
        "  {} memor{}",
        style(memories.len()).bold(),
        if memories.len() == 1 { "y" } else { "ies" }
    );
    println!();
    Ok(())
}

async fn update_memory(
    state: &AppState,
    scope: &ScopeArgs,
    id: &str,
    content: &str,
    keywords: Option<String>,
    json: bool,
) -> Result<()> {
    let memory = state
        .engine
        .update_memory(&scope.persona, scope.user, id, content, keywords)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&memory)?);
    } else {
        println!("  {} Memory {} updated.", style("*").green().bold(), style(&memory.id).dim());
        println!("  {}", style(&memory.content).dim());
    }
    Ok(())
}

async fn delete_memory(
    state: &AppState,
    scope: &ScopeArgs,
    id: &str,
    force: bool,
    json: bool,
) -> Result<()> {
    let memory = state.engine.get_memory(&scope.persona, scope.user, id).await?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete memory \"{}\"?",
                style(truncate(&memory.content, 50)).red().bold()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state
        .engine
        .delete_memory(&scope.persona, scope.user, id)
        .await?;

    if json {
        println!("{}", serde_json::json!({"deleted": true, "memory_id": id}));
    } else {
        println!("  {} Memory {} deleted.", style("x").red().bold(), id);
    }
    Ok(())
}

async fn search_memories(
    state: &AppState,
    scope: &ScopeArgs,
    query: &str,
    top_k: i64,
    prompt: bool,
    json: bool,
) -> Result<()> {
    if prompt {
        let text = state
            .engine
            .retrieve_for_prompt(&scope.persona, scope.user, query, top_k)
            .await;
        if json {
            println!("{}", serde_json::json!({ "prompt": text }));
        } else {
            println!("{text}");
        }
        return Ok(());
    }

    let top_k = if top_k <= 0 {
        state.config.retrieval.default_top_k as i64
    } else {
        top_k
    };
    let memories = state
        .engine
        .retrieve(&scope.persona, scope.user, query, top_k)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&memories)?);
        return Ok(());
    }

    if memories.is_empty() {
        println!("  {} Nothing relevant found.", style("i").blue().bold());
        return Ok(());
    }
    println!();
    println!("{}", memory_table(&memories));
    println!();
    Ok(())
}

// --- Formatting helpers ---

fn memory_table(memories: &[Memory]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Content").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Source").fg(Color::White),
        Cell::new("Hits").fg(Color::White),
        Cell::new("Date").fg(Color::White),
    ]);

    for memory in memories {
        let content = match memory.status {
            MemoryStatus::Active => Cell::new(truncate(&memory.content, 60)).fg(Color::White),
            MemoryStatus::Superseded => {
                Cell::new(format!("{} (superseded)", truncate(&memory.content, 45)))
                    .fg(Color::DarkGrey)
            }
        };
        let source = match memory.source {
            MemorySource::Manual => Cell::new("manual").fg(Color::Yellow),
            MemorySource::Auto => Cell::new("auto").fg(Color::Cyan),
        };

        table.add_row(vec![
            Cell::new(&memory.id).fg(Color::DarkGrey),
            content,
            Cell::new(memory.memory_type.to_string()).fg(Color::Magenta),
            source,
            Cell::new(memory.hit_count).fg(Color::DarkGrey),
            Cell::new(memory.created_at.format("%Y-%m-%d").to_string()).fg(Color::DarkGrey),
        ]);
    }
    table
}
