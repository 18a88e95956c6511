//! Run completion reporting
//!
//! Optional webhook ping when a run reaches a terminal state. Reporting
//! is strictly best-effort: a slow or broken webhook must never fail a
//! run that already finished, so the notifier logs and swallows errors.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::run::IngestionRun;

/// Payload posted to the completion webhook.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub scope: String,
    pub state: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records_processed: i64,
    pub records_rejected: i64,
    pub duplicates_collapsed: i64,
    pub failed_stage: Option<String>,
    pub error_message: Option<String>,
}

impl From<&IngestionRun> for RunReport {
    fn from(run: &IngestionRun) -> Self {
        RunReport {
            run_id: run.id,
            scope: run.scope.clone(),
            state: run.state.as_str().to_string(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            records_processed: run.records_processed,
            records_rejected: run.records_rejected,
            duplicates_collapsed: run.duplicates_collapsed,
            failed_stage: run.failed_stage.clone(),
            error_message: run.error_message.clone(),
        }
    }
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Report a finished run. Must not fail the caller.
    async fn notify(&self, run: &IngestionRun);
}

/// Posts the run report to a configured webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl CompletionNotifier for WebhookNotifier {
    async fn notify(&self, run: &IngestionRun) {
        let report = RunReport::from(run);
        let result = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(10))
            .json(&report)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(run_id = %run.id, "Run report delivered");
            }
            Ok(response) => {
                warn!(
                    run_id = %run.id,
                    status = %response.status(),
                    "Run report webhook answered with an error status"
                );
            }
            Err(err) => {
                warn!(run_id = %run.id, error = %err, "Run report webhook unreachable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::run::RunState;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn finished_run() -> IngestionRun {
        IngestionRun {
            id: Uuid::new_v4(),
            scope: "all".to_string(),
            state: RunState::Completed,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            records_processed: 90,
            records_rejected: 10,
            duplicates_collapsed: 2,
            error_message: None,
            failed_stage: None,
            runner_host: None,
        }
    }

    #[tokio::test]
    async fn test_notify_posts_camel_case_report() {
        let server = MockServer::start().await;
        let run = finished_run();

        Mock::given(method("POST"))
            .and(path("/hooks/etl"))
            .and(body_partial_json(serde_json::json!({
                "runId": run.id,
                "state": "completed",
                "recordsProcessed": 90,
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hooks/etl", server.uri()));
        notifier.notify(&run).await;
    }

    #[tokio::test]
    async fn test_notify_swallows_webhook_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hooks/etl", server.uri()));
        // Must return normally despite the 500.
        notifier.notify(&finished_run()).await;
    }

    #[tokio::test]
    async fn test_notify_survives_unreachable_host() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:1/hooks/etl");
        notifier.notify(&finished_run()).await;
    }
}
