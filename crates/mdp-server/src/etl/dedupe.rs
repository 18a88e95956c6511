//! Duplicate collapsing
//!
//! The same observation regularly arrives more than once: a feed
//! re-delivers records after a partner-side retry, and some entities
//! report through two sources at once. Records with equal fingerprints
//! are collapsed to a single survivor.
//!
//! Policy: the most recently ingested record wins; when two carry the
//! same ingestion timestamp the later-arriving one wins. The survivor
//! keeps its own field values wholesale, including any relabelled
//! category. First-seen order of fingerprints is preserved so output
//! stays deterministic.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::EnrichedRecord;

/// One fingerprint that actually had duplicates in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub fingerprint: String,
    /// How many records were discarded for this fingerprint
    pub collapsed: i32,
    /// Ingestion timestamp of the surviving record
    pub kept_ingested_at: DateTime<Utc>,
}

/// Survivors plus an account of what was collapsed.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub records: Vec<EnrichedRecord>,
    pub groups: Vec<DuplicateGroup>,
}

impl DedupOutcome {
    pub fn collapsed_total(&self) -> u64 {
        self.groups.iter().map(|g| g.collapsed as u64).sum()
    }
}

/// Collapses records sharing a fingerprint.
#[derive(Debug, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    pub fn dedupe(&self, records: Vec<EnrichedRecord>) -> DedupOutcome {
        let mut order: Vec<String> = Vec::new();
        let mut by_fingerprint: HashMap<String, (EnrichedRecord, i32)> = HashMap::new();

        for record in records {
            let fingerprint = record.record.fingerprint.clone();
            match by_fingerprint.get_mut(&fingerprint) {
                None => {
                    order.push(fingerprint.clone());
                    by_fingerprint.insert(fingerprint, (record, 1));
                }
                Some((kept, count)) => {
                    *count += 1;
                    // >= so equal timestamps keep the later arrival
                    if record.record.ingested_at >= kept.record.ingested_at {
                        *kept = record;
                    }
                }
            }
        }

        let mut outcome = DedupOutcome::default();
        for fingerprint in order {
            if let Some((kept, count)) = by_fingerprint.remove(&fingerprint) {
                if count > 1 {
                    outcome.groups.push(DuplicateGroup {
                        fingerprint,
                        collapsed: count - 1,
                        kept_ingested_at: kept.record.ingested_at,
                    });
                }
                outcome.records.push(kept);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::record::CanonicalRecord;
    use chrono::NaiveDate;
    use serde_json::json;
    use uuid::Uuid;

    fn enriched(
        entity_id: &str,
        category: &str,
        ingested_at: DateTime<Utc>,
    ) -> EnrichedRecord {
        let occurred_on = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        EnrichedRecord {
            record: CanonicalRecord {
                source_id: Uuid::new_v4(),
                source_name: "feed".to_string(),
                category: category.to_string(),
                entity_id: entity_id.to_string(),
                value: 1.0,
                occurred_on,
                attributes: json!({}),
                fingerprint: CanonicalRecord::compute_fingerprint(entity_id, occurred_on),
                content_hash: "c".repeat(64),
                ingested_at,
            },
            segment: None,
            value_band: "low".to_string(),
            weekday: "friday".to_string(),
            lookup_warning: None,
        }
    }

    #[test]
    fn test_distinct_records_pass_through_in_order() {
        let now = Utc::now();
        let records = vec![
            enriched("sku-1", "sales", now),
            enriched("sku-2", "sales", now),
            enriched("sku-3", "sales", now),
        ];

        let outcome = Deduplicator::new().dedupe(records);
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.groups.is_empty());
        assert_eq!(outcome.collapsed_total(), 0);
        let ids: Vec<_> = outcome
            .records
            .iter()
            .map(|r| r.record.entity_id.as_str())
            .collect();
        assert_eq!(ids, vec!["sku-1", "sku-2", "sku-3"]);
    }

    #[test]
    fn test_most_recently_ingested_wins_even_when_relabelled() {
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(30);

        // Same entity and business date, so same fingerprint, but the
        // later delivery calls it something else.
        let records = vec![
            enriched("sku-1", "sales", t1),
            enriched("sku-1", "promotions", t2),
        ];

        let outcome = Deduplicator::new().dedupe(records);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].record.category, "promotions");
        assert_eq!(outcome.records[0].record.ingested_at, t2);

        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.groups[0].collapsed, 1);
        assert_eq!(outcome.groups[0].kept_ingested_at, t2);
    }

    #[test]
    fn test_order_of_arrival_does_not_change_the_winner() {
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(30);

        let outcome = Deduplicator::new().dedupe(vec![
            enriched("sku-1", "late", t2),
            enriched("sku-1", "early", t1),
        ]);
        assert_eq!(outcome.records[0].record.category, "late");
    }

    #[test]
    fn test_equal_timestamps_keep_the_later_arrival() {
        let t = Utc::now();
        let outcome = Deduplicator::new().dedupe(vec![
            enriched("sku-1", "first", t),
            enriched("sku-1", "second", t),
        ]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].record.category, "second");
    }

    #[test]
    fn test_collapsed_counts_per_group() {
        let t = Utc::now();
        let records = vec![
            enriched("sku-1", "sales", t),
            enriched("sku-1", "sales", t + chrono::Duration::seconds(1)),
            enriched("sku-1", "sales", t + chrono::Duration::seconds(2)),
            enriched("sku-2", "sales", t),
            enriched("sku-2", "sales", t),
        ];

        let outcome = Deduplicator::new().dedupe(records);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.groups.len(), 2);
        assert_eq!(outcome.collapsed_total(), 3);
    }

    #[test]
    fn test_cross_source_duplicates_collapse() {
        // Fingerprints ignore the source, so the same observation
        // arriving through two feeds still collapses.
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(5);
        let mut a = enriched("sku-1", "sales", t1);
        a.record.source_name = "api-feed".to_string();
        let mut b = enriched("sku-1", "sales", t2);
        b.record.source_name = "ftp-drop".to_string();

        let outcome = Deduplicator::new().dedupe(vec![a, b]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].record.source_name, "ftp-drop");
    }
}
