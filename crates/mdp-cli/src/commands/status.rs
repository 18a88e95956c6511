//! `mdpctl status` command implementation
//!
//! Shows the current or most recent ingestion run.

use crate::api::types::RunSnapshot;
use crate::api::ApiClient;
use crate::error::Result;
use crate::progress::format_duration;
use colored::{ColoredString, Colorize};
use tracing::debug;

/// Show the current or most recent run, optionally for one scope
pub async fn run(scope: Option<String>, server_url: String) -> Result<()> {
    let client = ApiClient::new(server_url)?;

    debug!(scope = ?scope, "Fetching ingestion status");

    let snapshot = client.run_status(scope.as_deref()).await?;

    print_snapshot(&snapshot);

    Ok(())
}

/// Render one run snapshot as a block of labelled lines
pub(crate) fn print_snapshot(snapshot: &RunSnapshot) {
    println!("{}", "Ingestion Run:".cyan().bold());
    println!("  Run ID:     {}", snapshot.run_id);
    println!("  Scope:      {}", snapshot.scope);
    println!("  State:      {}", state_colored(&snapshot.state));
    println!("  Started:    {}", snapshot.started_at);
    if let Some(finished) = snapshot.finished_at {
        println!("  Finished:   {}", finished);
    }
    println!(
        "  Duration:   {}",
        format_duration(snapshot.duration_seconds)
    );
    println!("  Processed:  {}", snapshot.records_processed);
    println!("  Rejected:   {}", snapshot.records_rejected);
    println!("  Duplicates: {}", snapshot.duplicates_collapsed);
    if let Some(stage) = &snapshot.failed_stage {
        println!("  Failed at:  {}", stage.red());
    }
    if let Some(message) = &snapshot.error_message {
        println!("  Error:      {}", message.red());
    }
    if let Some(host) = &snapshot.runner_host {
        println!("  Runner:     {}", host);
    }
}

/// Colour a run state for terminal output
pub(crate) fn state_colored(state: &str) -> ColoredString {
    match state {
        "completed" => state.green(),
        "failed" => state.red(),
        "cancelled" => state.yellow(),
        _ => state.cyan(),
    }
}
