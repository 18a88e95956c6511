use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::etl::{EtlError, IngestionLogStore};

use super::super::types::RunSnapshot;

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;
pub const MAX_HISTORY_LIMIT: i64 = 500;

/// Recent runs, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRunsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRunsResponse {
    pub items: Vec<RunSnapshot>,
    pub count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ListRunsError {
    #[error("limit must be between 1 and {MAX_HISTORY_LIMIT}, got {0}")]
    InvalidLimit(i64),
    #[error("pipeline error: {0}")]
    Pipeline(EtlError),
}

impl From<EtlError> for ListRunsError {
    fn from(err: EtlError) -> Self {
        ListRunsError::Pipeline(err)
    }
}

impl Request<Result<ListRunsResponse, ListRunsError>> for ListRunsQuery {}

impl crate::cqrs::middleware::Query for ListRunsQuery {}

impl ListRunsQuery {
    pub fn validate(&self) -> Result<(), ListRunsError> {
        if let Some(limit) = self.limit {
            if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
                return Err(ListRunsError::InvalidLimit(limit));
            }
        }
        Ok(())
    }
}

#[tracing::instrument(skip(log), fields(scope = ?query.scope, limit = ?query.limit))]
pub async fn handle(
    log: Arc<dyn IngestionLogStore>,
    query: ListRunsQuery,
) -> Result<ListRunsResponse, ListRunsError> {
    query.validate()?;

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let runs = log.history(query.scope.as_deref(), limit).await?;

    let items: Vec<RunSnapshot> = runs.iter().map(RunSnapshot::from).collect();
    let count = items.len();

    Ok(ListRunsResponse { items, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::{MemoryIngestionLog, RunStats, Stage};

    #[test]
    fn test_validate_limit_bounds() {
        assert!(ListRunsQuery::default().validate().is_ok());
        assert!(ListRunsQuery {
            limit: Some(1),
            ..Default::default()
        }
        .validate()
        .is_ok());
        assert!(matches!(
            ListRunsQuery {
                limit: Some(0),
                ..Default::default()
            }
            .validate(),
            Err(ListRunsError::InvalidLimit(0))
        ));
        assert!(ListRunsQuery {
            limit: Some(501),
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let log = Arc::new(MemoryIngestionLog::new());

        let first = log.start("crm", None).await.unwrap();
        log.complete(first.id, RunStats::default()).await.unwrap();
        let second = log.start("crm", None).await.unwrap();
        log.fail(second.id, Stage::Extract, "gone").await.unwrap();

        let response = handle(log, ListRunsQuery::default()).await.unwrap();
        assert_eq!(response.count, 2);
        assert_eq!(response.items[0].run_id, second.id);
        assert_eq!(response.items[1].run_id, first.id);
    }

    #[tokio::test]
    async fn test_scope_and_limit_restrict_the_listing() {
        let log = Arc::new(MemoryIngestionLog::new());

        for _ in 0..3 {
            let run = log.start("crm", None).await.unwrap();
            log.complete(run.id, RunStats::default()).await.unwrap();
        }
        let other = log.start("commerce", None).await.unwrap();
        log.complete(other.id, RunStats::default()).await.unwrap();

        let query = ListRunsQuery {
            scope: Some("crm".to_string()),
            limit: Some(2),
        };
        let response = handle(log, query).await.unwrap();
        assert_eq!(response.count, 2);
        assert!(response.items.iter().all(|r| r.scope == "crm"));
    }
}
