//! Run lifecycle types
//!
//! An ingestion run walks a fixed state sequence and ends in exactly one
//! terminal state. The state machine here is the single place that knows
//! which transitions are legal; the log store enforces it when advancing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{EtlError, EtlResult};

/// Lifecycle state of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Started,
    Validating,
    Transforming,
    Enriching,
    Deduplicating,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &str {
        match self {
            RunState::Started => "started",
            RunState::Validating => "validating",
            RunState::Transforming => "transforming",
            RunState::Enriching => "enriching",
            RunState::Deduplicating => "deduplicating",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }

    /// Position in the processing sequence, used for the forward-only rule.
    fn order(&self) -> u8 {
        match self {
            RunState::Started => 0,
            RunState::Validating => 1,
            RunState::Transforming => 2,
            RunState::Enriching => 3,
            RunState::Deduplicating => 4,
            RunState::Completed | RunState::Failed | RunState::Cancelled => 5,
        }
    }

    /// A run may only move forward through the processing states, and may
    /// reach a terminal state from any non-terminal one. Terminal states
    /// never change again.
    pub fn can_advance_to(&self, next: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.order() > self.order()
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for RunState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "started" => RunState::Started,
            "validating" => RunState::Validating,
            "transforming" => RunState::Transforming,
            "enriching" => RunState::Enriching,
            "deduplicating" => RunState::Deduplicating,
            "completed" => RunState::Completed,
            "cancelled" => RunState::Cancelled,
            _ => RunState::Failed,
        }
    }
}

/// Pipeline stage labels used for failure attribution and deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Validate,
    Transform,
    Enrich,
    Dedupe,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Stage::Extract => "extract",
            Stage::Validate => "validate",
            Stage::Transform => "transform",
            Stage::Enrich => "enrich",
            Stage::Dedupe => "dedupe",
            Stage::Persist => "persist",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a triggered run should execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// The whole pipeline through to the sink.
    Full,
    /// Extract and validate only, reporting quality without writing
    /// records. Used to probe a feed before committing to it.
    ValidateOnly,
}

impl RunMode {
    /// Parse the optional `stage` trigger parameter.
    pub fn parse(stage: Option<&str>) -> EtlResult<Self> {
        match stage.map(str::trim) {
            None | Some("") => Ok(RunMode::Full),
            Some("validate") => Ok(RunMode::ValidateOnly),
            Some(other) => Err(EtlError::format(format!(
                "unsupported stage '{other}', only 'validate' may be requested"
            ))),
        }
    }
}

/// One ingestion run (maps to the ingestion_runs table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: Uuid,
    pub scope: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records_processed: i64,
    pub records_rejected: i64,
    pub duplicates_collapsed: i64,
    pub error_message: Option<String>,
    pub failed_stage: Option<String>,
    pub runner_host: Option<String>,
}

/// Counters reported when a run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub records_processed: u64,
    pub records_rejected: u64,
    pub duplicates_collapsed: u64,
}

/// Append-only state change entry (maps to ingestion_run_events).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: i64,
    pub run_id: Uuid,
    pub state: RunState,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
