use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::etl::{EtlError, RunCoordinator, SourceFormat, SourceType};

/// One source with a live reachability check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSourceQuery {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDetail {
    pub id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    pub format: SourceFormat,
    pub active: bool,
    /// Result of a single probe performed for this request.
    pub reachable: bool,
    /// Incremental extraction watermark, if any run has completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetSourceError {
    #[error("no source with id {id}")]
    NotFound { id: Uuid },
    #[error("registry error: {0}")]
    Registry(EtlError),
}

impl From<EtlError> for GetSourceError {
    fn from(err: EtlError) -> Self {
        GetSourceError::Registry(err)
    }
}

impl Request<Result<SourceDetail, GetSourceError>> for GetSourceQuery {}

impl crate::cqrs::middleware::Query for GetSourceQuery {}

#[tracing::instrument(skip(coordinator), fields(source_id = %query.id))]
pub async fn handle(
    coordinator: Arc<RunCoordinator>,
    query: GetSourceQuery,
) -> Result<SourceDetail, GetSourceError> {
    let source = coordinator
        .registry()
        .get(query.id)
        .await?
        .ok_or(GetSourceError::NotFound { id: query.id })?;

    // One probe, no retries: an interactive request should answer fast
    // and a transient miss just shows as unreachable.
    let reachable = match coordinator.extractors().get(source.source_type) {
        Some(extractor) => match extractor.probe(&source).await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(source = %source.name, error = %err, "Source probe failed");
                false
            }
        },
        None => false,
    };

    let watermark = coordinator.log().watermark(source.id).await?;

    Ok(SourceDetail {
        id: source.id,
        name: source.name,
        source_type: source.source_type,
        format: source.format,
        active: source.active,
        reachable,
        watermark,
        created_at: source.created_at,
        updated_at: source.updated_at,
    })
}
