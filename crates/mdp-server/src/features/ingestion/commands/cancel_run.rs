use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::etl::{CancelOutcome, EtlError, RunCoordinator, RunState};

/// Request cancellation of a running ingestion.
///
/// Delivery is asynchronous: the pipeline observes the signal at its
/// next suspension point, so the run may briefly stay in a processing
/// state after the command is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRunCommand {
    pub run_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRunResponse {
    pub run_id: Uuid,
    pub scope: String,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CancelRunError {
    #[error("no run with id {run_id}")]
    NotFound { run_id: Uuid },
    #[error("run {run_id} already finished in state '{state}'")]
    AlreadyFinished { run_id: Uuid, state: RunState },
    #[error("pipeline error: {0}")]
    Pipeline(EtlError),
}

impl From<EtlError> for CancelRunError {
    fn from(err: EtlError) -> Self {
        CancelRunError::Pipeline(err)
    }
}

impl Request<Result<CancelRunResponse, CancelRunError>> for CancelRunCommand {}

impl crate::cqrs::middleware::Command for CancelRunCommand {}

#[tracing::instrument(skip(coordinator), fields(run_id = %command.run_id))]
pub async fn handle(
    coordinator: Arc<RunCoordinator>,
    command: CancelRunCommand,
) -> Result<CancelRunResponse, CancelRunError> {
    match coordinator.cancel_run(command.run_id).await? {
        CancelOutcome::Cancelled(run) => Ok(CancelRunResponse {
            run_id: run.id,
            scope: run.scope,
            state: run.state,
            finished_at: run.finished_at,
        }),
        CancelOutcome::AlreadyTerminal(run) => Err(CancelRunError::AlreadyFinished {
            run_id: run.id,
            state: run.state,
        }),
        CancelOutcome::NotFound => Err(CancelRunError::NotFound {
            run_id: command.run_id,
        }),
    }
}
