//! Database extraction for external Postgres sources
//!
//! Runs the configured query read-only against the partner database and
//! streams each row as a JSON object via `row_to_json`, so the pipeline
//! is not coupled to the remote schema. The connection is opened per
//! extraction and dropped when the stream ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{descriptor, Extractor, RecordStream, CHANNEL_CAPACITY};
use crate::etl::config::EtlConfig;
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::record::RawRecord;
use crate::etl::source::{Source, SourceType};

#[derive(Debug, Clone, Deserialize)]
struct DatabaseDescriptor {
    /// Postgres connection string of the source database
    dsn: String,
    /// Query producing the feed rows
    query: String,
    /// Timestamp column used for incremental extraction
    #[serde(default)]
    since_column: Option<String>,
}

/// Adapter for `database` sources.
pub struct DatabaseExtractor {
    config: EtlConfig,
}

impl DatabaseExtractor {
    pub fn new(config: EtlConfig) -> Self {
        Self { config }
    }

    async fn connect(&self, desc: &DatabaseDescriptor, source: &Source) -> EtlResult<sqlx::PgPool> {
        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.config.extract_timeout())
            .connect(&desc.dsn)
            .await
            .map_err(|e| {
                EtlError::connection(format!("source '{}' database: {}", source.name, e))
            })
    }
}

/// Wrap the configured query so every row arrives as one JSON document,
/// optionally filtered by the incremental watermark.
fn build_query(desc: &DatabaseDescriptor, since: Option<DateTime<Utc>>) -> EtlResult<(String, bool)> {
    match (&desc.since_column, since) {
        (Some(column), Some(_)) => {
            // The column name is interpolated, so restrict it to plain
            // identifiers.
            if column.is_empty()
                || !column
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(EtlError::format(format!(
                    "since_column '{column}' is not a plain identifier"
                )));
            }
            Ok((
                format!(
                    "SELECT row_to_json(q)::text FROM ({}) q WHERE (q.{})::timestamptz > $1",
                    desc.query, column
                ),
                true,
            ))
        }
        _ => Ok((
            format!("SELECT row_to_json(q)::text FROM ({}) q", desc.query),
            false,
        )),
    }
}

#[async_trait]
impl Extractor for DatabaseExtractor {
    fn source_type(&self) -> SourceType {
        SourceType::Database
    }

    async fn probe(&self, source: &Source) -> EtlResult<()> {
        let desc: DatabaseDescriptor = descriptor(source)?;
        let pool = self.connect(&desc, source).await?;
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                EtlError::connection(format!("source '{}' database: {}", source.name, e))
            })?;
        pool.close().await;
        Ok(())
    }

    async fn extract(
        &self,
        source: &Source,
        since: Option<DateTime<Utc>>,
    ) -> EtlResult<RecordStream> {
        let desc: DatabaseDescriptor = descriptor(source)?;
        let (sql, bind_since) = build_query(&desc, since)?;
        let pool = self.connect(&desc, source).await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let source = source.clone();
        tokio::spawn(async move {
            let query = sqlx::query_scalar::<_, String>(&sql);
            let query = match (bind_since, since) {
                (true, Some(since)) => query.bind(since),
                _ => query,
            };

            let mut rows = query.fetch(&pool);
            while let Some(next) = rows.next().await {
                let item = match next {
                    Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                        Ok(payload) => Ok(RawRecord::new(source.id, source.name.clone(), payload)),
                        Err(e) => {
                            let _ = tx
                                .send(Err(EtlError::format(format!(
                                    "row from '{}' is not valid JSON: {}",
                                    source.name, e
                                ))))
                                .await;
                            return;
                        }
                    },
                    Err(e) => {
                        let _ = tx
                            .send(Err(EtlError::connection(format!(
                                "source '{}' database: {}",
                                source.name, e
                            ))))
                            .await;
                        return;
                    }
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(since_column: Option<&str>) -> DatabaseDescriptor {
        DatabaseDescriptor {
            dsn: "postgresql://localhost/partner".to_string(),
            query: "SELECT * FROM ventas".to_string(),
            since_column: since_column.map(str::to_string),
        }
    }

    #[test]
    fn test_build_query_plain() {
        let (sql, bind) = build_query(&desc(None), None).unwrap();
        assert_eq!(sql, "SELECT row_to_json(q)::text FROM (SELECT * FROM ventas) q");
        assert!(!bind);
    }

    #[test]
    fn test_build_query_without_watermark_ignores_since_column() {
        let (sql, bind) = build_query(&desc(Some("updated_at")), None).unwrap();
        assert!(!sql.contains("WHERE"));
        assert!(!bind);
    }

    #[test]
    fn test_build_query_with_watermark() {
        let (sql, bind) = build_query(&desc(Some("updated_at")), Some(Utc::now())).unwrap();
        assert!(sql.contains("WHERE (q.updated_at)::timestamptz > $1"));
        assert!(bind);
    }

    #[test]
    fn test_build_query_rejects_unsafe_column() {
        let result = build_query(&desc(Some("updated_at; DROP TABLE ventas")), Some(Utc::now()));
        assert!(matches!(result, Err(EtlError::Format { .. })));
    }
}
