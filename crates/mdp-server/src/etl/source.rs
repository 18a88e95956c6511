//! Source registry
//!
//! A source is one configured upstream system (CRM export, commerce API,
//! partner FTP drop, ...) together with the connection details its
//! extractor needs. The registry is the read-only catalogue the
//! coordinator resolves run scopes against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::error::{EtlError, EtlResult};

/// Kind of upstream system, which picks the extraction adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Api,
    Json,
    Csv,
    Xml,
    Database,
    Ftp,
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            SourceType::Api => "api",
            SourceType::Json => "json",
            SourceType::Csv => "csv",
            SourceType::Xml => "xml",
            SourceType::Database => "database",
            SourceType::Ftp => "ftp",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(SourceType::Api),
            "json" => Ok(SourceType::Json),
            "csv" => Ok(SourceType::Csv),
            "xml" => Ok(SourceType::Xml),
            "database" => Ok(SourceType::Database),
            "ftp" => Ok(SourceType::Ftp),
            other => Err(EtlError::format(format!("unknown source type: {other}"))),
        }
    }
}

/// Payload format of the bytes a source delivers. Mostly relevant for
/// FTP sources, where the transport says nothing about the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Json,
    Csv,
    Xml,
}

impl SourceFormat {
    pub fn as_str(&self) -> &str {
        match self {
            SourceFormat::Json => "json",
            SourceFormat::Csv => "csv",
            SourceFormat::Xml => "xml",
        }
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(SourceFormat::Json),
            "csv" => Ok(SourceFormat::Csv),
            "xml" => Ok(SourceFormat::Xml),
            other => Err(EtlError::format(format!("unknown source format: {other}"))),
        }
    }
}

/// A configured data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    /// Adapter-specific connection descriptor. Each extractor decodes
    /// the fields it needs; unknown fields are ignored.
    pub connection: serde_json::Value,
    pub format: SourceFormat,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Category to assign when a payload carries none of its own.
    pub fn default_category(&self) -> Option<&str> {
        self.connection.get("default_category").and_then(|v| v.as_str())
    }
}

/// What a run covers: every active source, or one source by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceScope {
    All,
    Source(String),
}

impl SourceScope {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            None => SourceScope::All,
            Some(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
                    SourceScope::All
                } else {
                    SourceScope::Source(trimmed.to_string())
                }
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceScope::All => "all",
            SourceScope::Source(name) => name,
        }
    }
}

impl std::fmt::Display for SourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only catalogue of configured sources.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn list(&self) -> EtlResult<Vec<Source>>;

    async fn get(&self, id: Uuid) -> EtlResult<Option<Source>>;

    async fn get_by_name(&self, name: &str) -> EtlResult<Option<Source>>;

    /// Resolve a run scope to the sources it covers.
    ///
    /// `All` means every active source. A source requested by name is
    /// returned even when inactive, since the operator asked for it
    /// explicitly; an unknown name is an error.
    async fn resolve_scope(&self, scope: &SourceScope) -> EtlResult<Vec<Source>> {
        match scope {
            SourceScope::All => {
                let sources = self.list().await?;
                Ok(sources.into_iter().filter(|s| s.active).collect())
            }
            SourceScope::Source(name) => match self.get_by_name(name).await? {
                Some(source) => Ok(vec![source]),
                None => Err(EtlError::UnknownSource { name: name.clone() }),
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    source_type: String,
    connection: serde_json::Value,
    format: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SourceRow> for Source {
    type Error = EtlError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        Ok(Source {
            id: row.id,
            name: row.name,
            source_type: row.source_type.parse()?,
            connection: row.connection,
            format: row.format.parse()?,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Registry backed by the `sources` table.
#[derive(Debug, Clone)]
pub struct PgSourceRegistry {
    pool: PgPool,
}

impl PgSourceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceRegistry for PgSourceRegistry {
    async fn list(&self) -> EtlResult<Vec<Source>> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            r#"
            SELECT id, name, source_type, connection, format, active, created_at, updated_at
            FROM sources
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Source::try_from).collect()
    }

    async fn get(&self, id: Uuid) -> EtlResult<Option<Source>> {
        let row: Option<SourceRow> = sqlx::query_as(
            r#"
            SELECT id, name, source_type, connection, format, active, created_at, updated_at
            FROM sources
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Source::try_from).transpose()
    }

    async fn get_by_name(&self, name: &str) -> EtlResult<Option<Source>> {
        let row: Option<SourceRow> = sqlx::query_as(
            r#"
            SELECT id, name, source_type, connection, format, active, created_at, updated_at
            FROM sources
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Source::try_from).transpose()
    }
}

/// In-memory registry for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceRegistry {
    sources: Vec<Source>,
}

impl MemorySourceRegistry {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
impl SourceRegistry for MemorySourceRegistry {
    async fn list(&self) -> EtlResult<Vec<Source>> {
        Ok(self.sources.clone())
    }

    async fn get(&self, id: Uuid) -> EtlResult<Option<Source>> {
        Ok(self.sources.iter().find(|s| s.id == id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> EtlResult<Option<Source>> {
        Ok(self.sources.iter().find(|s| s.name == name).cloned())
    }
}
