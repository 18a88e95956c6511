//! Extraction adapters
//!
//! One adapter per source type, all behind the [`Extractor`] trait:
//! - `http`: REST APIs and plain JSON documents over HTTP
//! - `csv`: local CSV drops, plain or gzip-compressed
//! - `xml`: local XML exports
//! - `database`: external Postgres databases queried read-only
//! - `ftp`: partner FTP servers delivering JSON, CSV or XML payloads
//!
//! Adapters emit records through a bounded stream so a large feed never
//! has to fit in memory at once. When a source fails mid-read, records
//! already emitted stand and the failure arrives as the final stream
//! item, which is what lets the pipeline keep partial progress.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use super::config::EtlConfig;
use super::error::{EtlError, EtlResult};
use super::record::RawRecord;
use super::source::{Source, SourceType};

pub mod csv;
pub mod database;
pub mod ftp;
pub mod http;
pub mod xml;

pub use self::csv::CsvExtractor;
pub use self::database::DatabaseExtractor;
pub use self::ftp::FtpExtractor;
pub use self::http::HttpExtractor;
pub use self::xml::XmlExtractor;

/// Records flowing out of an adapter. A failed extraction shows up as an
/// `Err` item after whatever records were read before the failure.
pub type RecordStream = BoxStream<'static, EtlResult<RawRecord>>;

/// Bounded capacity between a producing adapter and the pipeline.
pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// Extraction adapter for one source type.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// The source type this adapter serves.
    fn source_type(&self) -> SourceType;

    /// Verify the source is actually reachable: open the connection,
    /// perform the cheapest possible request, report the failure
    /// otherwise. No records are read.
    async fn probe(&self, source: &Source) -> EtlResult<()>;

    /// Open a record stream for the source. `since` asks the adapter to
    /// skip data older than the watermark where the transport allows
    /// telling (file mtime, FTP MDTM, query column); adapters that
    /// cannot tell deliver everything.
    async fn extract(
        &self,
        source: &Source,
        since: Option<DateTime<Utc>>,
    ) -> EtlResult<RecordStream>;
}

/// The set of registered adapters, keyed by source type.
#[derive(Clone, Default)]
pub struct ExtractorSet {
    extractors: HashMap<SourceType, Arc<dyn Extractor>>,
}

impl ExtractorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All production adapters wired with the given configuration.
    pub fn standard(config: &EtlConfig) -> Self {
        Self::new()
            .register(Arc::new(HttpExtractor::for_api(config.clone())))
            .register(Arc::new(HttpExtractor::for_json(config.clone())))
            .register(Arc::new(CsvExtractor::new()))
            .register(Arc::new(XmlExtractor::new()))
            .register(Arc::new(DatabaseExtractor::new(config.clone())))
            .register(Arc::new(FtpExtractor::new(config.clone())))
    }

    pub fn register(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(extractor.source_type(), extractor);
        self
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(&source_type).cloned()
    }
}

impl std::fmt::Debug for ExtractorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.extractors.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("ExtractorSet").field("types", &types).finish()
    }
}

/// Run a fallible operation with the configured retry policy.
///
/// Only retryable failures are retried; the delay escalates per attempt
/// the same way for every adapter.
pub(crate) async fn with_retries<T, F, Fut>(
    config: &EtlConfig,
    what: &str,
    mut op: F,
) -> EtlResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = EtlResult<T>>,
{
    let attempts = config.max_retries.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = config.retry_delay(attempt);
                warn!(
                    "{} attempt {}/{} failed: {}. Retrying in {}s...",
                    what,
                    attempt,
                    attempts,
                    e,
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("retry loop always returns")
}

/// Bridge a blocking producer onto a record stream.
///
/// The producer runs on the blocking pool and pushes records through a
/// bounded channel; if it returns an error, that error becomes the final
/// stream item. A producer should stop early when `blocking_send` fails,
/// which means the consumer went away.
pub(crate) fn spawn_blocking_stream<F>(produce: F) -> RecordStream
where
    F: FnOnce(&mpsc::Sender<EtlResult<RawRecord>>) -> EtlResult<()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        if let Err(err) = produce(&tx) {
            let _ = tx.blocking_send(Err(err));
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

/// An always-empty record stream, for sources with nothing new.
pub(crate) fn empty_stream() -> RecordStream {
    Box::pin(futures::stream::empty())
}

/// Decode a connection descriptor, naming the source on failure.
pub(crate) fn descriptor<T: serde::de::DeserializeOwned>(source: &Source) -> EtlResult<T> {
    serde_json::from_value(source.connection.clone()).map_err(|e| {
        EtlError::format(format!(
            "invalid connection descriptor for source '{}': {}",
            source.name, e
        ))
    })
}
