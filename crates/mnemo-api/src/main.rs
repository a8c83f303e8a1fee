//! mnemo CLI entry point.
//!
//! Parses CLI arguments, wires the memory engine to its SQLite, LanceDB and
//! HTTP adapters, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,mnemo=debug",
        _ => "trace",
    };
    if let Err(e) = mnemo_observe::tracing_setup::init_tracing(filter, cli.otel) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "mnemo", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    tracing::debug!(data_dir = %state.data_dir.display(), "application state ready");

    let result = match cli.command {
        Commands::Memory { action } => cli::memory::run(&state, action, cli.json).await,
        Commands::Chat { action } => cli::chat::run(&state, action, cli.json).await,
        Commands::Reconcile { scope } => cli::reconcile::run(&state, &scope, cli.json).await,
        Commands::Completions { .. } => Ok(()),
    };

    // Queued extractions finish before the process exits.
    state.shutdown().await;
    mnemo_observe::tracing_setup::shutdown_tracing();
    result
}
