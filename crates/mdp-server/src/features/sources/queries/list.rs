use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::etl::{EtlError, Source, SourceFormat, SourceRegistry, SourceType};

/// List configured sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSourcesQuery {
    /// Restrict to active or inactive sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// One source as the API reports it. The connection descriptor stays
/// server-side: it can carry credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceListItem {
    pub id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    pub format: SourceFormat,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Source> for SourceListItem {
    fn from(source: &Source) -> Self {
        SourceListItem {
            id: source.id,
            name: source.name.clone(),
            source_type: source.source_type,
            format: source.format,
            active: source.active,
            created_at: source.created_at,
            updated_at: source.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSourcesResponse {
    pub items: Vec<SourceListItem>,
    pub count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ListSourcesError {
    #[error("registry error: {0}")]
    Registry(EtlError),
}

impl From<EtlError> for ListSourcesError {
    fn from(err: EtlError) -> Self {
        ListSourcesError::Registry(err)
    }
}

impl Request<Result<ListSourcesResponse, ListSourcesError>> for ListSourcesQuery {}

impl crate::cqrs::middleware::Query for ListSourcesQuery {}

#[tracing::instrument(skip(registry), fields(active = ?query.active))]
pub async fn handle(
    registry: Arc<dyn SourceRegistry>,
    query: ListSourcesQuery,
) -> Result<ListSourcesResponse, ListSourcesError> {
    let mut sources = registry.list().await?;
    if let Some(active) = query.active {
        sources.retain(|s| s.active == active);
    }
    sources.sort_by(|a, b| a.name.cmp(&b.name));

    let items: Vec<SourceListItem> = sources.iter().map(SourceListItem::from).collect();
    let count = items.len();

    Ok(ListSourcesResponse { items, count })
}
