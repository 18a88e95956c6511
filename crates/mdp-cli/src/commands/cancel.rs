//! `mdpctl cancel` command implementation
//!
//! Requests cancellation of a running ingestion.

use crate::api::ApiClient;
use crate::error::Result;
use colored::Colorize;
use tracing::debug;
use uuid::Uuid;

/// Cancel a running ingestion by run id
pub async fn run(run_id: Uuid, server_url: String) -> Result<()> {
    let client = ApiClient::new(server_url)?;

    debug!(%run_id, "Requesting run cancellation");

    let cancelled = client.cancel_run(run_id).await?;

    println!(
        "{} run {} for scope '{}'",
        "Cancelled".yellow().bold(),
        cancelled.run_id,
        cancelled.scope
    );
    println!("Records persisted before cancellation are kept.");

    Ok(())
}
