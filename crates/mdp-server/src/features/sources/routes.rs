//! Source catalogue routes
//!
//! Read-only view of the configured sources for operators. Source
//! administration happens elsewhere; this surface never mutates the
//! catalogue and never exposes connection descriptors.
//!
//! # Route Structure
//!
//! - `GET /api/v1/sources` - List configured sources
//! - `GET /api/v1/sources/:id` - One source with a live reachability probe

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::{ApiResponse, ErrorResponse};
use crate::etl::RunCoordinator;

use super::queries::{GetSourceError, GetSourceQuery, ListSourcesError, ListSourcesQuery};

/// Creates the sources router with all routes configured
pub fn sources_routes() -> Router<Arc<RunCoordinator>> {
    Router::new()
        .route("/", get(list_sources))
        .route("/:id", get(get_source))
}

/// List configured sources
///
/// # Endpoint
///
/// `GET /api/v1/sources?active=true`
///
/// # Response
///
/// - `200 OK` - Sources ordered by name
#[tracing::instrument(skip(coordinator, query))]
async fn list_sources(
    State(coordinator): State<Arc<RunCoordinator>>,
    Query(query): Query<ListSourcesQuery>,
) -> Result<Response, SourcesApiError> {
    let response =
        super::queries::list::handle(coordinator.registry().clone(), query).await?;

    tracing::debug!(count = response.count, "Sources listed via API");

    let meta = json!({ "count": response.count });

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success_with_meta(response.items, meta)),
    )
        .into_response())
}

/// Get one source with a live reachability probe
///
/// # Endpoint
///
/// `GET /api/v1/sources/:id`
///
/// # Response
///
/// - `200 OK` - Source detail including `reachable` and the stored watermark
/// - `404 Not Found` - No source with that id
#[tracing::instrument(skip(coordinator), fields(source_id = %id))]
async fn get_source(
    State(coordinator): State<Arc<RunCoordinator>>,
    Path(id): Path<Uuid>,
) -> Result<Response, SourcesApiError> {
    let detail = super::queries::get::handle(coordinator, GetSourceQuery { id }).await?;

    tracing::debug!(
        source = %detail.name,
        reachable = detail.reachable,
        "Source retrieved via API"
    );

    Ok((StatusCode::OK, Json(ApiResponse::success(detail))).into_response())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Unified error type for source API endpoints
#[derive(Debug)]
enum SourcesApiError {
    ListError(ListSourcesError),
    GetError(GetSourceError),
}

impl From<ListSourcesError> for SourcesApiError {
    fn from(err: ListSourcesError) -> Self {
        Self::ListError(err)
    }
}

impl From<GetSourceError> for SourcesApiError {
    fn from(err: GetSourceError) -> Self {
        Self::GetError(err)
    }
}

impl IntoResponse for SourcesApiError {
    fn into_response(self) -> Response {
        match self {
            SourcesApiError::GetError(GetSourceError::NotFound { .. }) => {
                let error = ErrorResponse::new("NOT_FOUND", self.to_string());
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            }
            SourcesApiError::GetError(GetSourceError::Registry(_))
            | SourcesApiError::ListError(ListSourcesError::Registry(_)) => {
                tracing::error!("Registry error while serving sources: {}", self);
                let error = ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            }
        }
    }
}

impl std::fmt::Display for SourcesApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListError(e) => write!(f, "{}", e),
            Self::GetError(e) => write!(f, "{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_structure() {
        let router = sources_routes();
        assert!(format!("{:?}", router).contains("Router"));
    }

    #[test]
    fn test_not_found_display() {
        let id = Uuid::new_v4();
        let err = SourcesApiError::GetError(GetSourceError::NotFound { id });
        assert!(err.to_string().contains(&id.to_string()));
    }
}
