use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::etl::{EtlError, RunCoordinator, RunMode, RunState};

/// Trigger an ingestion run.
///
/// All fields are optional: an empty body starts a full-pipeline run
/// over every active source using stored watermarks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartRunCommand {
    /// `"all"` (default) or one source by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_scope: Option<String>,
    /// Explicit extraction baseline, overriding stored watermarks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_date: Option<DateTime<Utc>>,
    /// `"validate"` for a validation-only dry pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    pub run_id: Uuid,
    pub scope: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StartRunError {
    #[error("{0}")]
    InvalidStage(String),
    #[error("unknown source '{name}'")]
    UnknownSource { name: String },
    #[error("a run for scope '{scope}' is already active (started {active_started_at})")]
    Conflict {
        scope: String,
        active_started_at: DateTime<Utc>,
    },
    #[error("pipeline error: {0}")]
    Pipeline(EtlError),
}

impl From<EtlError> for StartRunError {
    fn from(err: EtlError) -> Self {
        match err {
            EtlError::UnknownSource { name } => StartRunError::UnknownSource { name },
            EtlError::ConcurrencyConflict {
                scope,
                active_started_at,
            } => StartRunError::Conflict {
                scope,
                active_started_at,
            },
            EtlError::Format { message } => StartRunError::InvalidStage(message),
            other => StartRunError::Pipeline(other),
        }
    }
}

impl Request<Result<StartRunResponse, StartRunError>> for StartRunCommand {}

impl crate::cqrs::middleware::Command for StartRunCommand {}

impl StartRunCommand {
    pub fn validate(&self) -> Result<(), StartRunError> {
        RunMode::parse(self.stage.as_deref())
            .map(|_| ())
            .map_err(|err| StartRunError::InvalidStage(err.to_string()))
    }
}

#[tracing::instrument(
    skip(coordinator, command),
    fields(scope = ?command.source_scope, stage = ?command.stage)
)]
pub async fn handle(
    coordinator: Arc<RunCoordinator>,
    command: StartRunCommand,
) -> Result<StartRunResponse, StartRunError> {
    command.validate()?;

    let run = coordinator
        .start_run(
            command.source_scope.as_deref(),
            command.since_date,
            command.stage.as_deref(),
        )
        .await?;

    Ok(StartRunResponse {
        run_id: run.id,
        scope: run.scope,
        state: run.state,
        started_at: run.started_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::extract::RecordStream;
    use crate::etl::{
        Enricher, EtlConfig, EtlResult, Extractor, ExtractorSet, IngestionLogStore,
        MemoryIngestionLog, MemoryRecordSink, MemorySourceRegistry, RawRecord, Source,
        SourceFormat, SourceType,
    };
    use async_trait::async_trait;
    use serde_json::json;

    struct IdleExtractor;

    #[async_trait]
    impl Extractor for IdleExtractor {
        fn source_type(&self) -> SourceType {
            SourceType::Json
        }

        async fn probe(&self, _source: &Source) -> EtlResult<()> {
            Ok(())
        }

        async fn extract(
            &self,
            _source: &Source,
            _since: Option<DateTime<Utc>>,
        ) -> EtlResult<RecordStream> {
            Ok(Box::pin(futures::stream::empty::<EtlResult<RawRecord>>()))
        }
    }

    fn test_source(name: &str) -> Source {
        Source {
            id: Uuid::new_v4(),
            name: name.to_string(),
            source_type: SourceType::Json,
            connection: json!({ "url": "http://localhost/feed.json" }),
            format: SourceFormat::Json,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn coordinator_with(log: Arc<MemoryIngestionLog>) -> Arc<RunCoordinator> {
        let config = EtlConfig::default();
        Arc::new(RunCoordinator::new(
            Arc::new(MemorySourceRegistry::default().with_source(test_source("crm"))),
            log,
            Arc::new(MemoryRecordSink::new()),
            ExtractorSet::new().register(Arc::new(IdleExtractor)),
            Enricher::new(None, config.lookup_timeout()),
            None,
            config,
        ))
    }

    #[test]
    fn test_validate_accepts_default_and_validate_stage() {
        assert!(StartRunCommand::default().validate().is_ok());

        let command = StartRunCommand {
            stage: Some("validate".to_string()),
            ..Default::default()
        };
        assert!(command.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_stage() {
        let command = StartRunCommand {
            stage: Some("transform".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            command.validate(),
            Err(StartRunError::InvalidStage(_))
        ));
    }

    #[test]
    fn test_command_deserializes_from_empty_body() {
        let command: StartRunCommand = serde_json::from_str("{}").unwrap();
        assert!(command.source_scope.is_none());
        assert!(command.since_date.is_none());
        assert!(command.stage.is_none());

        let command: StartRunCommand =
            serde_json::from_value(json!({ "sourceScope": "crm", "stage": "validate" })).unwrap();
        assert_eq!(command.source_scope.as_deref(), Some("crm"));
        assert_eq!(command.stage.as_deref(), Some("validate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_accepts_run() {
        let coordinator = coordinator_with(Arc::new(MemoryIngestionLog::new()));

        let response = handle(coordinator, StartRunCommand::default()).await.unwrap();
        assert_eq!(response.scope, "all");
        assert_eq!(response.state, RunState::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_maps_active_scope_to_conflict() {
        let log = Arc::new(MemoryIngestionLog::new());
        let held = log.start("all", None).await.unwrap();
        let coordinator = coordinator_with(log);

        let result = handle(coordinator, StartRunCommand::default()).await;
        match result {
            Err(StartRunError::Conflict {
                active_started_at, ..
            }) => assert_eq!(active_started_at, held.started_at),
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_maps_unknown_scope_to_not_found() {
        let coordinator = coordinator_with(Arc::new(MemoryIngestionLog::new()));

        let command = StartRunCommand {
            source_scope: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            handle(coordinator, command).await,
            Err(StartRunError::UnknownSource { .. })
        ));
    }
}
