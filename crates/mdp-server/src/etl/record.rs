//! Record types flowing through the pipeline
//!
//! A record changes shape as it moves through the stages:
//! raw payload from a source -> canonical marketing record -> enriched
//! record ready for the sink. Each shape carries the identifiers the
//! later stages need (content hash for idempotency, fingerprint for
//! deduplication).

use chrono::{DateTime, NaiveDate, Utc};
use mdp_common::fingerprint::fingerprint_parts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record exactly as extracted from a source, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source this record came from
    pub source_id: Uuid,
    /// Source name, carried for log messages
    pub source_name: String,
    /// Undecoded payload as the adapter produced it
    pub payload: serde_json::Value,
    /// Hash of (source, payload), used to make re-runs idempotent
    pub content_hash: String,
    /// When the extractor emitted this record
    pub ingested_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(source_id: Uuid, source_name: impl Into<String>, payload: serde_json::Value) -> Self {
        // serde_json orders map keys, so serializing the payload gives a
        // stable byte sequence for hashing.
        let canonical = payload.to_string();
        let content_hash =
            fingerprint_parts([source_id.to_string().as_str(), canonical.as_str()]);
        Self {
            source_id,
            source_name: source_name.into(),
            payload,
            content_hash,
            ingested_at: Utc::now(),
        }
    }
}

/// Record in the canonical marketing schema, produced by the transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub source_id: Uuid,
    pub source_name: String,
    /// Business category ('sales', 'stock', 'customers', ...)
    pub category: String,
    /// Identifier of the entity the metric describes
    pub entity_id: String,
    /// Numeric metric value
    pub value: f64,
    /// Business date the metric refers to
    pub occurred_on: NaiveDate,
    /// Source fields that did not map to a canonical column
    pub attributes: serde_json::Value,
    /// Dedup fingerprint over the record's natural identity
    pub fingerprint: String,
    /// Carried over from the raw record
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Fingerprint for duplicate detection.
    ///
    /// Deliberately covers only the natural identity (entity and business
    /// date), not the category or value: the same observation re-delivered
    /// through another feed, possibly relabelled, must still collapse to
    /// one record.
    pub fn compute_fingerprint(entity_id: &str, occurred_on: NaiveDate) -> String {
        let date = occurred_on.format("%Y-%m-%d").to_string();
        fingerprint_parts([entity_id, date.as_str()])
    }
}

/// Canonical record plus derived and looked-up enrichment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub record: CanonicalRecord,
    /// Audience segment from the lookup service, when it answered in time
    pub segment: Option<String>,
    /// Derived value band: 'low', 'medium' or 'high'
    pub value_band: String,
    /// Derived weekday of the business date
    pub weekday: String,
    /// Set when the lookup failed or timed out and the record went
    /// through unenriched
    pub lookup_warning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_record_hash_is_stable() {
        let id = Uuid::new_v4();
        let a = RawRecord::new(id, "crm", json!({"b": 2, "a": 1}));
        let b = RawRecord::new(id, "crm", json!({"a": 1, "b": 2}));
        // Key order in the literal must not matter.
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_raw_record_hash_depends_on_source() {
        let payload = json!({"a": 1});
        let a = RawRecord::new(Uuid::new_v4(), "crm", payload.clone());
        let b = RawRecord::new(Uuid::new_v4(), "erp", payload);
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_fingerprint_ignores_category() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let a = CanonicalRecord::compute_fingerprint("sku-1", day);
        let b = CanonicalRecord::compute_fingerprint("sku-1", day);
        assert_eq!(a, b);

        let other_day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_ne!(a, CanonicalRecord::compute_fingerprint("sku-1", other_day));
        assert_ne!(a, CanonicalRecord::compute_fingerprint("sku-2", day));
    }
}
