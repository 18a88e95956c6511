//! Ingestion API routes
//!
//! Wires the ingestion commands and queries to Axum HTTP handlers.
//!
//! # Route Structure
//!
//! - `POST /api/v1/ingestion/start` - Trigger an ingestion run
//! - `GET /api/v1/ingestion/status` - Current or most recent run
//! - `GET /api/v1/ingestion/runs` - Run history, newest first
//! - `POST /api/v1/ingestion/runs/:id/cancel` - Cancel a running ingestion

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::{ApiResponse, ErrorResponse};
use crate::etl::RunCoordinator;

use super::{
    commands::{
        start_run, CancelRunCommand, CancelRunError, StartRunCommand, StartRunError,
    },
    queries::{GetStatusError, GetStatusQuery, ListRunsError, ListRunsQuery},
};

/// Creates the ingestion router with all routes configured
pub fn ingestion_routes() -> Router<Arc<RunCoordinator>> {
    Router::new()
        .route("/start", post(start_ingestion))
        .route("/status", get(get_status))
        .route("/runs", get(list_runs))
        .route("/runs/:id/cancel", post(cancel_run))
}

/// Trigger an ingestion run
///
/// # Endpoint
///
/// `POST /api/v1/ingestion/start`
///
/// # Request Body
///
/// ```json
/// {
///   "sourceScope": "crm",
///   "sinceDate": "2024-03-01T00:00:00Z",
///   "stage": "validate"
/// }
/// ```
///
/// All fields are optional; an empty or missing body starts a full run
/// over every active source.
///
/// # Response
///
/// - `202 Accepted` - Run accepted, pipeline runs in the background
/// - `400 Bad Request` - Unsupported stage parameter
/// - `404 Not Found` - Unknown source scope
/// - `409 Conflict` - A run for the scope is already active
#[tracing::instrument(skip(coordinator, command))]
async fn start_ingestion(
    State(coordinator): State<Arc<RunCoordinator>>,
    command: Option<Json<StartRunCommand>>,
) -> Result<Response, IngestionApiError> {
    let command = command.map(|Json(c)| c).unwrap_or_default();

    let response = start_run::handle(coordinator, command).await?;

    tracing::info!(
        run_id = %response.run_id,
        scope = %response.scope,
        "Ingestion run accepted via API"
    );

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response())
}

/// Cancel a running ingestion
///
/// # Endpoint
///
/// `POST /api/v1/ingestion/runs/:id/cancel`
///
/// # Response
///
/// - `202 Accepted` - Cancellation signal delivered
/// - `404 Not Found` - No run with that id
/// - `409 Conflict` - Run already finished
#[tracing::instrument(skip(coordinator), fields(run_id = %run_id))]
async fn cancel_run(
    State(coordinator): State<Arc<RunCoordinator>>,
    Path(run_id): Path<Uuid>,
) -> Result<Response, IngestionApiError> {
    let command = CancelRunCommand { run_id };

    let response = super::commands::cancel_run::handle(coordinator, command).await?;

    tracing::info!(run_id = %response.run_id, "Ingestion run cancelled via API");

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response())
}

/// Current or most recent run
///
/// # Endpoint
///
/// `GET /api/v1/ingestion/status?scope=crm`
///
/// # Response
///
/// - `200 OK` - Run snapshot with state, counters and duration
/// - `404 Not Found` - No runs recorded for the scope yet
#[tracing::instrument(skip(coordinator, query))]
async fn get_status(
    State(coordinator): State<Arc<RunCoordinator>>,
    Query(query): Query<GetStatusQuery>,
) -> Result<Response, IngestionApiError> {
    let snapshot =
        super::queries::get_status::handle(coordinator.log().clone(), query).await?;

    tracing::debug!(
        run_id = %snapshot.run_id,
        state = %snapshot.state,
        "Ingestion status retrieved via API"
    );

    Ok((StatusCode::OK, Json(ApiResponse::success(snapshot))).into_response())
}

/// Run history, newest first
///
/// # Endpoint
///
/// `GET /api/v1/ingestion/runs?scope=crm&limit=50`
///
/// # Query Parameters
///
/// - `scope` - Restrict to one scope (default: every scope)
/// - `limit` - Maximum number of runs (default: 20, max: 500)
///
/// # Response
///
/// - `200 OK` - List of run snapshots
/// - `400 Bad Request` - Limit out of range
#[tracing::instrument(skip(coordinator, query))]
async fn list_runs(
    State(coordinator): State<Arc<RunCoordinator>>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Response, IngestionApiError> {
    let response = super::queries::list_runs::handle(coordinator.log().clone(), query).await?;

    tracing::debug!(count = response.count, "Ingestion runs listed via API");

    let meta = json!({ "count": response.count });

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success_with_meta(response.items, meta)),
    )
        .into_response())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Unified error type for ingestion API endpoints
#[derive(Debug)]
enum IngestionApiError {
    StartError(StartRunError),
    CancelError(CancelRunError),
    StatusError(GetStatusError),
    ListError(ListRunsError),
}

impl From<StartRunError> for IngestionApiError {
    fn from(err: StartRunError) -> Self {
        Self::StartError(err)
    }
}

impl From<CancelRunError> for IngestionApiError {
    fn from(err: CancelRunError) -> Self {
        Self::CancelError(err)
    }
}

impl From<GetStatusError> for IngestionApiError {
    fn from(err: GetStatusError) -> Self {
        Self::StatusError(err)
    }
}

impl From<ListRunsError> for IngestionApiError {
    fn from(err: ListRunsError) -> Self {
        Self::ListError(err)
    }
}

impl IntoResponse for IngestionApiError {
    fn into_response(self) -> Response {
        match self {
            // Start errors
            IngestionApiError::StartError(StartRunError::InvalidStage(_)) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", self.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            }
            IngestionApiError::StartError(StartRunError::UnknownSource { .. }) => {
                let error = ErrorResponse::new("NOT_FOUND", self.to_string());
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            }
            IngestionApiError::StartError(StartRunError::Conflict {
                ref active_started_at,
                ..
            }) => {
                let error = ErrorResponse::with_details(
                    "CONFLICT",
                    self.to_string(),
                    json!({ "activeRunStartedAt": active_started_at }),
                );
                (StatusCode::CONFLICT, Json(error)).into_response()
            }
            IngestionApiError::StartError(StartRunError::Pipeline(_)) => {
                tracing::error!("Pipeline error while starting ingestion: {}", self);
                let error = ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            }

            // Cancel errors
            IngestionApiError::CancelError(CancelRunError::NotFound { .. }) => {
                let error = ErrorResponse::new("NOT_FOUND", self.to_string());
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            }
            IngestionApiError::CancelError(CancelRunError::AlreadyFinished { state, .. }) => {
                let error = ErrorResponse::with_details(
                    "CONFLICT",
                    self.to_string(),
                    json!({ "state": state.as_str() }),
                );
                (StatusCode::CONFLICT, Json(error)).into_response()
            }
            IngestionApiError::CancelError(CancelRunError::Pipeline(_)) => {
                tracing::error!("Pipeline error while cancelling run: {}", self);
                let error = ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            }

            // Status errors
            IngestionApiError::StatusError(GetStatusError::NoRuns { .. }) => {
                let error = ErrorResponse::new("NOT_FOUND", self.to_string());
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            }
            IngestionApiError::StatusError(GetStatusError::Pipeline(_)) => {
                tracing::error!("Pipeline error while reading status: {}", self);
                let error = ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            }

            // List errors
            IngestionApiError::ListError(ListRunsError::InvalidLimit(_)) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", self.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            }
            IngestionApiError::ListError(ListRunsError::Pipeline(_)) => {
                tracing::error!("Pipeline error while listing runs: {}", self);
                let error = ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            }
        }
    }
}

impl std::fmt::Display for IngestionApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartError(e) => write!(f, "{}", e),
            Self::CancelError(e) => write!(f, "{}", e),
            Self::StatusError(e) => write!(f, "{}", e),
            Self::ListError(e) => write!(f, "{}", e),
        }
    }
}
