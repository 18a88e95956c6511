//! `mdpctl runs` command implementation
//!
//! Lists run history, newest first.

use crate::api::types::RunSnapshot;
use crate::api::ApiClient;
use crate::error::{CliError, Result};
use crate::progress::format_duration;
use tracing::debug;

/// Run the runs command
///
/// # Arguments
///
/// * `scope` - Restrict history to one scope
/// * `limit` - Maximum number of runs to show (1-500)
/// * `server_url` - MDP server URL
pub async fn run(scope: Option<String>, limit: i64, server_url: String) -> Result<()> {
    if !(1..=500).contains(&limit) {
        return Err(CliError::invalid_argument(
            "Limit must be between 1 and 500",
        ));
    }

    let client = ApiClient::new(server_url)?;

    debug!(scope = ?scope, limit, "Fetching run history");

    let runs = client.list_runs(scope.as_deref(), Some(limit)).await?;

    if runs.is_empty() {
        println!("No ingestion runs recorded yet.");
        println!("Run 'mdpctl start' to trigger one.");
        return Ok(());
    }

    display_table(&runs);

    Ok(())
}

/// Display run history in table format
fn display_table(runs: &[RunSnapshot]) {
    use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Run ID",
            "Scope",
            "State",
            "Started",
            "Duration",
            "Processed",
            "Rejected",
            "Duplicates",
        ]);

    for run in runs {
        table.add_row(vec![
            run.run_id.to_string(),
            run.scope.clone(),
            run.state.clone(),
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            format_duration(run.duration_seconds),
            run.records_processed.to_string(),
            run.records_rejected.to_string(),
            run.duplicates_collapsed.to_string(),
        ]);
    }

    println!();
    println!("{}", table);
    println!();
    println!("Showing {} runs, newest first", runs.len());
}
