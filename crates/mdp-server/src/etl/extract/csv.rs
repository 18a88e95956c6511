//! CSV extraction for file-drop sources
//!
//! Reads delimited files dropped on local disk (typically an NFS mount a
//! partner writes to), plain or gzip-compressed. Each row becomes a JSON
//! object keyed by the header line, so the rest of the pipeline never
//! sees CSV-specific shapes.

use std::fs::File;
use std::io::Read;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::{descriptor, empty_stream, spawn_blocking_stream, Extractor, RecordStream};
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::record::RawRecord;
use crate::etl::source::{Source, SourceType};

#[derive(Debug, Clone, Deserialize)]
struct CsvDescriptor {
    /// Path of the dropped file, `.gz` suffix means gzip-compressed
    path: String,
    /// Whether the first row is a header line
    #[serde(default = "default_true")]
    headers: bool,
    /// Field delimiter, defaults to a comma
    #[serde(default)]
    delimiter: Option<char>,
}

fn default_true() -> bool {
    true
}

impl CsvDescriptor {
    fn delimiter_byte(&self) -> u8 {
        self.delimiter.map(|c| c as u8).unwrap_or(b',')
    }
}

/// Adapter for `csv` sources.
#[derive(Debug, Default)]
pub struct CsvExtractor;

impl CsvExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for CsvExtractor {
    fn source_type(&self) -> SourceType {
        SourceType::Csv
    }

    async fn probe(&self, source: &Source) -> EtlResult<()> {
        let desc: CsvDescriptor = descriptor(source)?;
        let meta = tokio::fs::metadata(&desc.path).await.map_err(|e| {
            EtlError::connection(format!("source '{}' file '{}': {}", source.name, desc.path, e))
        })?;
        if !meta.is_file() {
            return Err(EtlError::connection(format!(
                "source '{}' path '{}' is not a file",
                source.name, desc.path
            )));
        }
        Ok(())
    }

    async fn extract(
        &self,
        source: &Source,
        since: Option<DateTime<Utc>>,
    ) -> EtlResult<RecordStream> {
        let desc: CsvDescriptor = descriptor(source)?;
        let meta = tokio::fs::metadata(&desc.path).await?;

        if let (Some(since), Ok(modified)) = (since, meta.modified()) {
            let modified: DateTime<Utc> = modified.into();
            if modified <= since {
                debug!(
                    "Skipping '{}': file unchanged since {}",
                    source.name, since
                );
                return Ok(empty_stream());
            }
        }

        let source = source.clone();
        Ok(spawn_blocking_stream(move |tx| {
            let file = File::open(&desc.path)?;
            if desc.path.ends_with(".gz") {
                send_csv_records(
                    GzDecoder::new(file),
                    desc.delimiter_byte(),
                    desc.headers,
                    &source,
                    tx,
                )
            } else {
                send_csv_records(file, desc.delimiter_byte(), desc.headers, &source, tx)
            }
        }))
    }
}

/// Decode CSV rows from any reader and push them as records.
///
/// Also used by the FTP adapter for CSV payloads it has already
/// downloaded. Stops at the first malformed row; rows before it stand.
pub(crate) fn send_csv_records<R: Read>(
    reader: R,
    delimiter: u8,
    has_headers: bool,
    source: &Source,
    tx: &mpsc::Sender<EtlResult<RawRecord>>,
) -> EtlResult<()> {
    let mut rdr = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .flexible(false)
        .from_reader(reader);

    let headers: Option<::csv::StringRecord> = if has_headers {
        Some(rdr.headers()?.clone())
    } else {
        None
    };

    for result in rdr.records() {
        let row = result?;
        let mut map = serde_json::Map::new();
        match &headers {
            Some(headers) => {
                for (header, field) in headers.iter().zip(row.iter()) {
                    map.insert(
                        header.trim().to_string(),
                        serde_json::Value::String(field.to_string()),
                    );
                }
            }
            None => {
                for (i, field) in row.iter().enumerate() {
                    map.insert(
                        format!("column_{i}"),
                        serde_json::Value::String(field.to_string()),
                    );
                }
            }
        }

        let record = RawRecord::new(source.id, source.name.clone(), serde_json::Value::Object(map));
        if tx.blocking_send(Ok(record)).is_err() {
            return Ok(());
        }
    }

    Ok(())
}
