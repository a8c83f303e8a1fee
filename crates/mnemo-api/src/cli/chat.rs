//! Chat-turn commands: the surface a chat handler uses to feed the
//! extraction buffer.

use anyhow::Result;
use clap::Subcommand;
use console::style;

use mnemo_core::memory::buffer::AccumulateOutcome;

use super::ScopeArgs;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ChatCommand {
    /// Record one user/assistant exchange.
    Turn {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Conversation id.
        #[arg(long, short = 'c')]
        conversation: String,

        /// What the user said.
        #[arg(long = "user-message")]
        user_message: String,

        /// What the assistant replied.
        #[arg(long = "assistant-message")]
        assistant_message: String,
    },

    /// Show the turns buffered for a conversation.
    Pending {
        /// Conversation id.
        #[arg(long, short = 'c')]
        conversation: String,
    },
}

pub async fn run(state: &AppState, action: ChatCommand, json: bool) -> Result<()> {
    match action {
        ChatCommand::Turn {
            scope,
            conversation,
            user_message,
            assistant_message,
        } => {
            let outcome = state
                .engine
                .accumulate_turn(
                    &conversation,
                    &scope.persona,
                    scope.user,
                    &user_message,
                    &assistant_message,
                )
                .await?;
            print_outcome(&conversation, outcome, json);
            Ok(())
        }
        ChatCommand::Pending { conversation } => {
            if !state.engine.extraction_enabled() && !json {
                println!(
                    "  {} Extraction model not configured; nothing is buffered.",
                    style("i").blue().bold()
                );
                return Ok(());
            }
            let batch = state.engine.pending_batch(&conversation).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&batch)?);
                return Ok(());
            }
            match batch {
                None => println!(
                    "  {} Nothing buffered for {}.",
                    style("i").blue().bold(),
                    style(&conversation).cyan()
                ),
                Some(batch) => {
                    println!(
                        "  {} round{} buffered for {} ({}/{})",
                        style(batch.round_count).bold(),
                        if batch.round_count == 1 { "" } else { "s" },
                        style(&conversation).cyan(),
                        batch.persona_id,
                        batch.user_id
                    );
                    for (i, turn) in batch.turns.iter().enumerate() {
                        println!("  {} user: {}", style(i + 1).dim(), turn.user_message);
                        println!("    assistant: {}", turn.assistant_message);
                    }
                }
            }
            Ok(())
        }
    }
}

fn print_outcome(conversation: &str, outcome: AccumulateOutcome, json: bool) {
    let (status, rounds) = match outcome {
        AccumulateOutcome::Buffered { round_count } => ("buffered", Some(round_count)),
        AccumulateOutcome::HandedOff { round_count } => ("handed_off", Some(round_count)),
        AccumulateOutcome::Deferred { round_count } => ("deferred", Some(round_count)),
        AccumulateOutcome::Disabled => ("disabled", None),
    };

    if json {
        println!(
            "{}",
            serde_json::json!({
                "conversation_id": conversation,
                "status": status,
                "round_count": rounds,
            })
        );
        return;
    }

    match outcome {
        AccumulateOutcome::Buffered { round_count } => println!(
            "  {} Turn buffered ({} round{}).",
            style("*").green().bold(),
            round_count,
            if round_count == 1 { "" } else { "s" }
        ),
        AccumulateOutcome::HandedOff { round_count } => println!(
            "  {} {} rounds sent for memory extraction.",
            style("*").green().bold(),
            round_count
        ),
        AccumulateOutcome::Deferred { round_count } => println!(
            "  {} Extraction queue is full; {} rounds kept for the next turn.",
            style("!").yellow().bold(),
            round_count
        ),
        AccumulateOutcome::Disabled => println!(
            "  {} Extraction model not configured; turn not recorded.",
            style("i").blue().bold()
        ),
    }
}
