//! `mdpctl start` command implementation
//!
//! Triggers an ingestion run, optionally following it to completion.

use crate::api::types::StartRunRequest;
use crate::api::ApiClient;
use crate::error::{CliError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use colored::Colorize;
use tracing::debug;

/// Run the start command
///
/// # Arguments
///
/// * `scope` - Optional source name; omitted means every active source
/// * `since` - Optional extraction baseline overriding stored watermarks
/// * `validate_only` - Stop after validation without persisting anything
/// * `watch` - Follow the run until it reaches a terminal state
/// * `server_url` - MDP server URL
pub async fn run(
    scope: Option<String>,
    since: Option<String>,
    validate_only: bool,
    watch: bool,
    server_url: String,
) -> Result<()> {
    let since_date = since.as_deref().map(parse_since).transpose()?;

    let client = ApiClient::new(server_url)?;

    let request = StartRunRequest {
        source_scope: scope.clone(),
        since_date,
        stage: validate_only.then(|| "validate".to_string()),
    };

    debug!(scope = ?scope, since = ?since_date, validate_only, "Requesting ingestion run");

    let started = client.start_run(&request).await?;

    println!(
        "{} run {} for scope '{}'",
        "Started".green().bold(),
        started.run_id,
        started.scope
    );

    if validate_only {
        println!("Validation-only pass: records are checked but not persisted.");
    }

    if watch {
        super::watch::follow(&client, Some(started.scope.as_str()), 2).await
    } else {
        println!(
            "Track it with 'mdpctl watch --scope {}' or 'mdpctl status'.",
            started.scope
        );
        Ok(())
    }
}

/// Parse a `--since` value.
///
/// Accepts a full RFC 3339 timestamp or a bare `YYYY-MM-DD` date, which
/// becomes midnight UTC.
fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        CliError::invalid_argument(format!(
            "'{}' is not a valid date. Use YYYY-MM-DD or an RFC 3339 timestamp.",
            raw
        ))
    })?;

    Ok(DateTime::<Utc>::from_naive_utc_and_offset(
        date.and_time(NaiveTime::MIN),
        Utc,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_since_accepts_rfc3339() {
        let parsed = parse_since("2024-03-01T10:30:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T10:30:00+00:00");

        let offset = parse_since("2024-03-01T10:30:00+02:00").unwrap();
        assert_eq!(offset.to_rfc3339(), "2024-03-01T08:30:00+00:00");
    }

    #[test]
    fn test_parse_since_accepts_bare_date() {
        let parsed = parse_since("2024-03-01").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_since_rejects_garbage() {
        let err = parse_since("yesterday").unwrap_err();
        assert!(err.to_string().contains("not a valid date"));
    }
}
