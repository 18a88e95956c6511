//! Record enrichment
//!
//! Adds derived fields (value band, weekday) and an audience segment
//! fetched from the enrichment service. Enrichment never fails a
//! record: when the lookup errors or exceeds its timeout the record
//! goes through unenriched with a warning attached, and the run keeps
//! moving.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::error::{EtlError, EtlResult};
use super::record::{CanonicalRecord, EnrichedRecord};

/// Resolves the audience segment for an entity.
#[async_trait]
pub trait LookupService: Send + Sync {
    /// `Ok(None)` means the service answered and knows no segment;
    /// `Err` means the service misbehaved.
    async fn segment(&self, category: &str, entity_id: &str) -> EtlResult<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    segment: Option<String>,
}

/// Lookup client for the HTTP enrichment service.
pub struct HttpLookup {
    client: Client,
    base_url: String,
}

impl HttpLookup {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LookupService for HttpLookup {
    async fn segment(&self, category: &str, entity_id: &str) -> EtlResult<Option<String>> {
        let url = format!("{}/segments/{}/{}", self.base_url, category, entity_id);
        let resp = self.client.get(&url).send().await?;

        match resp.status() {
            status if status.is_success() => {
                let body: SegmentResponse = resp.json().await?;
                Ok(body.segment)
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => Err(EtlError::connection(format!(
                "segment service answered {status} for {url}"
            ))),
        }
    }
}

/// Adds derived and looked-up fields to canonical records.
pub struct Enricher {
    lookup: Option<Arc<dyn LookupService>>,
    lookup_timeout: Duration,
}

impl Enricher {
    pub fn new(lookup: Option<Arc<dyn LookupService>>, lookup_timeout: Duration) -> Self {
        Self {
            lookup,
            lookup_timeout,
        }
    }

    /// Enrich one record. Total: lookup trouble downgrades to a warning
    /// on the record instead of an error.
    pub async fn enrich(&self, record: CanonicalRecord) -> EnrichedRecord {
        let value_band = value_band(record.value).to_string();
        let weekday = record.occurred_on.format("%A").to_string().to_lowercase();

        let (segment, lookup_warning) = match &self.lookup {
            None => (None, None),
            Some(lookup) => {
                let call = lookup.segment(&record.category, &record.entity_id);
                match tokio::time::timeout(self.lookup_timeout, call).await {
                    Ok(Ok(segment)) => (segment, None),
                    Ok(Err(e)) => {
                        let warning = format!("segment lookup failed: {e}");
                        debug!(
                            "Record '{}' goes through unenriched: {}",
                            record.entity_id, warning
                        );
                        (None, Some(warning))
                    }
                    Err(_) => {
                        let warning = format!(
                            "segment lookup timed out after {}ms",
                            self.lookup_timeout.as_millis()
                        );
                        debug!(
                            "Record '{}' goes through unenriched: {}",
                            record.entity_id, warning
                        );
                        (None, Some(warning))
                    }
                }
            }
        };

        EnrichedRecord {
            record,
            segment,
            value_band,
            weekday,
            lookup_warning,
        }
    }
}

fn value_band(value: f64) -> &'static str {
    if value < 100.0 {
        "low"
    } else if value < 1000.0 {
        "medium"
    } else {
        "high"
    }
}
