//! Shared DTOs for the ingestion API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::etl::{IngestionRun, RunState};

/// Snapshot of one run as the API reports it.
///
/// `duration_seconds` is measured to `finished_at` for finished runs and
/// to now for live ones, so a polling client sees it grow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub scope: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub records_processed: i64,
    pub records_rejected: i64,
    pub duplicates_collapsed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_host: Option<String>,
}

impl From<&IngestionRun> for RunSnapshot {
    fn from(run: &IngestionRun) -> Self {
        let end = run.finished_at.unwrap_or_else(Utc::now);
        RunSnapshot {
            run_id: run.id,
            scope: run.scope.clone(),
            state: run.state,
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration_seconds: (end - run.started_at).num_seconds().max(0),
            records_processed: run.records_processed,
            records_rejected: run.records_rejected,
            duplicates_collapsed: run.duplicates_collapsed,
            failed_stage: run.failed_stage.clone(),
            error_message: run.error_message.clone(),
            runner_host: run.runner_host.clone(),
        }
    }
}
