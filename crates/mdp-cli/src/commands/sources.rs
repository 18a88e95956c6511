//! `mdpctl sources` command implementation
//!
//! Read-only view of the source catalogue.

use crate::api::types::{SourceDetail, SourceSummary};
use crate::api::ApiClient;
use crate::error::Result;
use colored::Colorize;
use tracing::debug;
use uuid::Uuid;

/// List configured sources
///
/// Only active sources are shown unless `all` is set.
pub async fn list(all: bool, server_url: String) -> Result<()> {
    let client = ApiClient::new(server_url)?;

    let active = if all { None } else { Some(true) };

    debug!(all, "Fetching source catalogue");

    let sources = client.list_sources(active).await?;

    if sources.is_empty() {
        if all {
            println!("No sources configured.");
        } else {
            println!("No active sources configured.");
            println!("Run 'mdpctl sources list --all' to include inactive ones.");
        }
        return Ok(());
    }

    display_table(&sources);

    Ok(())
}

/// Show one source, including a live reachability probe
pub async fn show(id: Uuid, server_url: String) -> Result<()> {
    let client = ApiClient::new(server_url)?;

    debug!(%id, "Fetching source details");

    let source = client.get_source(id).await?;

    print_detail(&source);

    Ok(())
}

/// Display the source catalogue in table format
fn display_table(sources: &[SourceSummary]) {
    use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["ID", "Name", "Type", "Format", "Active"]);

    for source in sources {
        table.add_row(vec![
            source.id.to_string(),
            source.name.clone(),
            source.source_type.clone(),
            source.format.clone(),
            if source.active { "yes" } else { "no" }.to_string(),
        ]);
    }

    println!();
    println!("{}", table);
    println!();
    println!("{} sources", sources.len());
}

/// Render one source as a block of labelled lines
fn print_detail(source: &SourceDetail) {
    println!("{}", source.name.green().bold());
    println!("  ID:        {}", source.id);
    println!("  Type:      {}", source.source_type);
    println!("  Format:    {}", source.format);
    println!("  Active:    {}", if source.active { "yes" } else { "no" });
    println!(
        "  Reachable: {}",
        if source.reachable {
            "yes".green()
        } else {
            "no".red()
        }
    );
    match source.watermark {
        Some(watermark) => println!("  Watermark: {}", watermark),
        None => println!("  Watermark: {}", "none (next run starts from scratch)".dimmed()),
    }
    println!("  Created:   {}", source.created_at);
    println!("  Updated:   {}", source.updated_at);
}
