//! API request and response types
//!
//! Matches the mdp-server wire format: successful responses arrive in a
//! `{success, data, meta}` envelope, errors in `{success, error}` with a
//! machine-readable code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard success envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// Standard error envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

/// Error payload inside the envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// Request body for `POST /api/v1/ingestion/start`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    /// `"all"` (the default) or one source by name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_scope: Option<String>,

    /// Explicit extraction baseline, overriding stored watermarks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_date: Option<DateTime<Utc>>,

    /// `"validate"` for a validation-only dry pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// An accepted run, as the start endpoint answers
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRun {
    pub run_id: Uuid,
    pub scope: String,
    pub state: String,
    pub started_at: DateTime<Utc>,
}

/// A cancelled run, as the cancel endpoint answers
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledRun {
    pub run_id: Uuid,
    pub scope: String,
    pub state: String,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Snapshot of one ingestion run
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub scope: String,
    pub state: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub records_processed: i64,
    pub records_rejected: i64,
    pub duplicates_collapsed: i64,
    #[serde(default)]
    pub failed_stage: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub runner_host: Option<String>,
}

impl RunSnapshot {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state.as_str(), "completed" | "failed" | "cancelled")
    }
}

/// One entry from the source catalogue listing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub id: Uuid,
    pub name: String,
    pub source_type: String,
    pub format: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Source details, including the reachability probe result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDetail {
    pub id: Uuid,
    pub name: String,
    pub source_type: String,
    pub format: String,
    pub active: bool,
    pub reachable: bool,
    #[serde(default)]
    pub watermark: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_snapshot_deserializes_server_payload() {
        let payload = json!({
            "runId": "123e4567-e89b-12d3-a456-426614174000",
            "scope": "all",
            "state": "enriching",
            "startedAt": "2024-03-01T10:00:00Z",
            "durationSeconds": 12,
            "recordsProcessed": 0,
            "recordsRejected": 0,
            "duplicatesCollapsed": 0
        });

        let snapshot: RunSnapshot = serde_json::from_value(payload).unwrap();
        assert_eq!(snapshot.scope, "all");
        assert_eq!(snapshot.state, "enriching");
        assert!(snapshot.finished_at.is_none());
        assert!(!snapshot.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        let mut snapshot: RunSnapshot = serde_json::from_value(json!({
            "runId": "123e4567-e89b-12d3-a456-426614174000",
            "scope": "all",
            "state": "completed",
            "startedAt": "2024-03-01T10:00:00Z",
            "finishedAt": "2024-03-01T10:01:00Z",
            "durationSeconds": 60,
            "recordsProcessed": 10,
            "recordsRejected": 0,
            "duplicatesCollapsed": 0
        }))
        .unwrap();

        assert!(snapshot.is_terminal());
        snapshot.state = "failed".to_string();
        assert!(snapshot.is_terminal());
        snapshot.state = "cancelled".to_string();
        assert!(snapshot.is_terminal());
        snapshot.state = "validating".to_string();
        assert!(!snapshot.is_terminal());
    }

    #[test]
    fn test_start_request_omits_unset_fields() {
        let request = StartRunRequest::default();
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, json!({}));

        let request = StartRunRequest {
            source_scope: Some("crm".to_string()),
            since_date: None,
            stage: Some("validate".to_string()),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, json!({"sourceScope": "crm", "stage": "validate"}));
    }
}
