//! `mdpctl watch` command implementation
//!
//! Polls a run until it reaches a terminal state.

use crate::api::ApiClient;
use crate::error::{CliError, Result};
use crate::progress::create_spinner;
use std::time::Duration;
use tracing::debug;

/// Run the watch command
///
/// # Arguments
///
/// * `scope` - Scope whose latest run to follow
/// * `interval_secs` - Seconds between polls
/// * `server_url` - MDP server URL
pub async fn run(scope: Option<String>, interval_secs: u64, server_url: String) -> Result<()> {
    if interval_secs == 0 {
        return Err(CliError::invalid_argument(
            "Poll interval must be at least 1 second",
        ));
    }

    let client = ApiClient::new(server_url)?;

    follow(&client, scope.as_deref(), interval_secs).await
}

/// Poll the status endpoint until the watched run finishes.
///
/// Prints the final snapshot. A failed run becomes a `RunNotCompleted`
/// error so the process exits non-zero; a cancelled run counts as a
/// deliberate stop and exits cleanly.
pub(crate) async fn follow(
    client: &ApiClient,
    scope: Option<&str>,
    interval_secs: u64,
) -> Result<()> {
    let spinner = create_spinner("Contacting server...");

    let outcome = loop {
        match client.run_status(scope).await {
            Ok(snapshot) if snapshot.is_terminal() => break Ok(snapshot),
            Ok(snapshot) => {
                debug!(
                    run_id = %snapshot.run_id,
                    state = %snapshot.state,
                    "Run still in progress"
                );
                spinner.set_message(format!("Run {} is {}...", snapshot.run_id, snapshot.state));
            }
            Err(err) => break Err(err),
        }

        tokio::time::sleep(Duration::from_secs(interval_secs)).await;
    };

    spinner.finish_and_clear();

    let snapshot = outcome?;

    super::status::print_snapshot(&snapshot);

    if snapshot.state == "failed" {
        return Err(CliError::RunNotCompleted(snapshot.state));
    }

    Ok(())
}
