use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::etl::{EtlError, IngestionLogStore, SourceScope};

use super::super::types::RunSnapshot;

/// Current or most recent run, optionally restricted to one scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetStatusQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetStatusError {
    #[error("no ingestion runs recorded for scope '{scope}'")]
    NoRuns { scope: String },
    #[error("pipeline error: {0}")]
    Pipeline(EtlError),
}

impl From<EtlError> for GetStatusError {
    fn from(err: EtlError) -> Self {
        GetStatusError::Pipeline(err)
    }
}

impl Request<Result<RunSnapshot, GetStatusError>> for GetStatusQuery {}

impl crate::cqrs::middleware::Query for GetStatusQuery {}

#[tracing::instrument(skip(log), fields(scope = ?query.scope))]
pub async fn handle(
    log: Arc<dyn IngestionLogStore>,
    query: GetStatusQuery,
) -> Result<RunSnapshot, GetStatusError> {
    let run = log.latest(query.scope.as_deref()).await?;

    match run {
        Some(run) => Ok(RunSnapshot::from(&run)),
        None => Err(GetStatusError::NoRuns {
            scope: SourceScope::parse(query.scope.as_deref())
                .as_str()
                .to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::{MemoryIngestionLog, RunState};

    #[tokio::test]
    async fn test_no_runs_yet_reports_not_found() {
        let log = Arc::new(MemoryIngestionLog::new());

        let result = handle(log, GetStatusQuery::default()).await;
        match result {
            Err(GetStatusError::NoRuns { scope }) => assert_eq!(scope, "all"),
            other => panic!("expected NoRuns, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_latest_run_is_reported() {
        let log = Arc::new(MemoryIngestionLog::new());
        let run = log.start("crm", None).await.unwrap();

        let snapshot = handle(log.clone(), GetStatusQuery::default()).await.unwrap();
        assert_eq!(snapshot.run_id, run.id);
        assert_eq!(snapshot.state, RunState::Started);
        assert!(snapshot.finished_at.is_none());
    }

    #[tokio::test]
    async fn test_scope_filter_only_sees_that_scope() {
        let log = Arc::new(MemoryIngestionLog::new());
        log.start("crm", None).await.unwrap();

        let query = GetStatusQuery {
            scope: Some("commerce".to_string()),
        };
        let result = handle(log, query).await;
        match result {
            Err(GetStatusError::NoRuns { scope }) => assert_eq!(scope, "commerce"),
            other => panic!("expected NoRuns, got {other:?}"),
        }
    }
}
