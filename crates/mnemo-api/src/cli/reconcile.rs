//! `mnemo reconcile`: rebuild missing embeddings and index entries.

use anyhow::Result;
use console::style;

use super::OptionalScopeArgs;
use crate::state::AppState;

pub async fn run(state: &AppState, scope: &OptionalScopeArgs, json: bool) -> Result<()> {
    let target = match (&scope.persona, scope.user) {
        (Some(persona), Some(user)) => Some((persona.as_str(), user)),
        _ => None,
    };
    let report = state.engine.reconcile(target).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "scopes": report.scopes,
                "scanned": report.scanned,
                "embedded": report.embedded,
                "indexed": report.indexed,
                "failed": report.failed,
                "expired_batches": report.expired_batches,
            })
        );
        return Ok(());
    }

    println!();
    println!(
        "  {} Reconciled {} scope{}",
        style("*").green().bold(),
        style(report.scopes).bold(),
        if report.scopes == 1 { "" } else { "s" }
    );
    println!("    scanned:   {}", report.scanned);
    println!("    embedded:  {}", report.embedded);
    println!("    indexed:   {}", report.indexed);
    if report.failed > 0 {
        println!("    failed:    {}", style(report.failed).red());
    }
    if report.expired_batches > 0 {
        println!("    purged:    {} expired pending batches", report.expired_batches);
    }
    println!();
    Ok(())
}
