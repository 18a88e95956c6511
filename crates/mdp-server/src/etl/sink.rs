//! Record sink
//!
//! Final stage of the pipeline: write enriched records into the
//! normalized_records table. Writes are keyed on the dedup fingerprint
//! and only ever replace a row with a same-or-newer observation, so
//! re-ingesting an unchanged feed is a no-op and a re-delivered record
//! wins only when it was ingested later.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::EtlResult;
use super::record::EnrichedRecord;

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist a deduplicated batch. Returns how many rows were written,
    /// counting both fresh inserts and newer-observation replacements.
    async fn persist(&self, run_id: Uuid, records: &[EnrichedRecord]) -> EtlResult<u64>;
}

/// Sink backed by the normalized_records table.
#[derive(Debug, Clone)]
pub struct PgRecordSink {
    pool: sqlx::PgPool,
}

impl PgRecordSink {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSink for PgRecordSink {
    async fn persist(&self, run_id: Uuid, records: &[EnrichedRecord]) -> EtlResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut written = 0u64;
        let mut tx = self.pool.begin().await?;
        for enriched in records {
            let record = &enriched.record;
            let result = sqlx::query(
                "INSERT INTO normalized_records \
                 (fingerprint, source_id, run_id, category, entity_id, value, occurred_on, \
                  attributes, segment, value_band, weekday, lookup_warning, ingested_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
                 ON CONFLICT (fingerprint) DO UPDATE SET \
                     source_id = EXCLUDED.source_id, \
                     run_id = EXCLUDED.run_id, \
                     category = EXCLUDED.category, \
                     entity_id = EXCLUDED.entity_id, \
                     value = EXCLUDED.value, \
                     occurred_on = EXCLUDED.occurred_on, \
                     attributes = EXCLUDED.attributes, \
                     segment = EXCLUDED.segment, \
                     value_band = EXCLUDED.value_band, \
                     weekday = EXCLUDED.weekday, \
                     lookup_warning = EXCLUDED.lookup_warning, \
                     ingested_at = EXCLUDED.ingested_at \
                 WHERE normalized_records.ingested_at <= EXCLUDED.ingested_at",
            )
            .bind(&record.fingerprint)
            .bind(record.source_id)
            .bind(run_id)
            .bind(&record.category)
            .bind(&record.entity_id)
            .bind(record.value)
            .bind(record.occurred_on)
            .bind(&record.attributes)
            .bind(enriched.segment.as_deref())
            .bind(&enriched.value_band)
            .bind(&enriched.weekday)
            .bind(enriched.lookup_warning.as_deref())
            .bind(record.ingested_at)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }
}

/// In-memory sink with the same replacement rule, for tests.
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    records: Mutex<HashMap<String, EnrichedRecord>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents, in no particular order.
    pub async fn records(&self) -> Vec<EnrichedRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn persist(&self, _run_id: Uuid, records: &[EnrichedRecord]) -> EtlResult<u64> {
        let mut stored = self.records.lock().await;
        let mut written = 0u64;
        for enriched in records {
            let fingerprint = enriched.record.fingerprint.clone();
            match stored.get(&fingerprint) {
                Some(existing)
                    if existing.record.ingested_at > enriched.record.ingested_at =>
                {
                    // Stored observation is newer, keep it.
                }
                _ => {
                    stored.insert(fingerprint, enriched.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::record::CanonicalRecord;
    use chrono::{Duration, NaiveDate, Utc};
    use serde_json::json;

    fn enriched(entity: &str, value: f64, ingested_offset_secs: i64) -> EnrichedRecord {
        let occurred_on = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let record = CanonicalRecord {
            source_id: Uuid::new_v4(),
            source_name: "crm".to_string(),
            category: "sales".to_string(),
            entity_id: entity.to_string(),
            value,
            occurred_on,
            attributes: json!({}),
            fingerprint: CanonicalRecord::compute_fingerprint(entity, occurred_on),
            content_hash: format!("hash-{entity}-{value}"),
            ingested_at: Utc::now() + Duration::seconds(ingested_offset_secs),
        };
        EnrichedRecord {
            record,
            segment: None,
            value_band: "low".to_string(),
            weekday: "friday".to_string(),
            lookup_warning: None,
        }
    }

    #[tokio::test]
    async fn test_persist_inserts_new_records() {
        let sink = MemoryRecordSink::new();
        let written = sink
            .persist(Uuid::new_v4(), &[enriched("a", 1.0, 0), enriched("b", 2.0, 0)])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(sink.len().await, 2);
    }

    #[tokio::test]
    async fn test_newer_observation_replaces_stored_row() {
        let sink = MemoryRecordSink::new();
        sink.persist(Uuid::new_v4(), &[enriched("a", 1.0, 0)])
            .await
            .unwrap();

        let written = sink
            .persist(Uuid::new_v4(), &[enriched("a", 9.0, 60)])
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(sink.len().await, 1);
        let records = sink.records().await;
        assert_eq!(records[0].record.value, 9.0);
    }

    #[tokio::test]
    async fn test_older_observation_does_not_replace() {
        let sink = MemoryRecordSink::new();
        sink.persist(Uuid::new_v4(), &[enriched("a", 9.0, 60)])
            .await
            .unwrap();

        let written = sink
            .persist(Uuid::new_v4(), &[enriched("a", 1.0, 0)])
            .await
            .unwrap();

        assert_eq!(written, 0);
        let records = sink.records().await;
        assert_eq!(records[0].record.value, 9.0);
    }
}
