//! FTP extraction for partner file drops
//!
//! Downloads the configured file over FTP and decodes it according to
//! the source's declared format (JSON, CSV or XML). suppaftp only
//! offers a synchronous client, so all FTP work runs on the blocking
//! pool; downloads retry with the configured escalating delay since FTP
//! drops are the flakiest transport we deal with.

use std::io::Read;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::Deserialize;
use suppaftp::FtpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    csv::send_csv_records, descriptor, empty_stream, spawn_blocking_stream, with_retries,
    xml::send_xml_records, Extractor, RecordStream,
};
use crate::etl::config::EtlConfig;
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::record::RawRecord;
use crate::etl::source::{Source, SourceFormat, SourceType};

#[derive(Debug, Clone, Deserialize)]
struct FtpDescriptor {
    host: String,
    #[serde(default = "default_ftp_port")]
    port: u16,
    /// Remote path of the drop file, `.gz` suffix means gzip-compressed
    path: String,
    #[serde(default = "default_ftp_user")]
    username: String,
    #[serde(default)]
    password: String,
    /// Element name delimiting one record, for XML payloads
    #[serde(default = "default_record_element")]
    record_element: String,
    /// Field delimiter for CSV payloads, defaults to a comma
    #[serde(default)]
    delimiter: Option<char>,
    /// Whether CSV payloads start with a header line
    #[serde(default = "default_true")]
    headers: bool,
}

fn default_ftp_port() -> u16 {
    21
}

fn default_ftp_user() -> String {
    "anonymous".to_string()
}

fn default_record_element() -> String {
    "record".to_string()
}

fn default_true() -> bool {
    true
}

/// Adapter for `ftp` sources.
pub struct FtpExtractor {
    config: EtlConfig,
}

impl FtpExtractor {
    pub fn new(config: EtlConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Extractor for FtpExtractor {
    fn source_type(&self) -> SourceType {
        SourceType::Ftp
    }

    async fn probe(&self, source: &Source) -> EtlResult<()> {
        let desc: FtpDescriptor = descriptor(source)?;
        let name = source.name.clone();
        tokio::task::spawn_blocking(move || probe_sync(&desc, &name))
            .await
            .map_err(|e| EtlError::Storage(format!("FTP probe task panicked: {e}")))?
    }

    async fn extract(
        &self,
        source: &Source,
        since: Option<DateTime<Utc>>,
    ) -> EtlResult<RecordStream> {
        let desc: FtpDescriptor = descriptor(source)?;

        let downloaded = with_retries(&self.config, "FTP download", || {
            let desc = desc.clone();
            async move {
                tokio::task::spawn_blocking(move || fetch_sync(&desc, since))
                    .await
                    .map_err(|e| EtlError::Storage(format!("FTP download task panicked: {e}")))?
            }
        })
        .await?;

        let buffer = match downloaded {
            Some(buffer) => buffer,
            None => {
                debug!("Skipping '{}': remote file unchanged", source.name);
                return Ok(empty_stream());
            }
        };

        let source = source.clone();
        let format = source.format;
        Ok(spawn_blocking_stream(move |tx| {
            let bytes = if desc.path.ends_with(".gz") {
                let mut decoded = Vec::new();
                GzDecoder::new(&buffer[..])
                    .read_to_end(&mut decoded)
                    .map_err(|e| EtlError::format(format!("bad gzip data: {e}")))?;
                decoded
            } else {
                buffer
            };

            match format {
                SourceFormat::Json => send_json_records(&bytes, &source, tx),
                SourceFormat::Csv => send_csv_records(
                    &bytes[..],
                    desc.delimiter.map(|c| c as u8).unwrap_or(b','),
                    desc.headers,
                    &source,
                    tx,
                ),
                SourceFormat::Xml => send_xml_records(&bytes, &desc.record_element, &source, tx),
            }
        }))
    }
}

/// Connect, log in and disconnect, without transferring anything.
fn probe_sync(desc: &FtpDescriptor, source_name: &str) -> EtlResult<()> {
    let mut ftp = connect_sync(desc, source_name)?;
    if let Err(e) = ftp.quit() {
        warn!("Failed to quit FTP session gracefully: {}", e);
    }
    Ok(())
}

/// Download the drop file, or report `None` when MDTM says it has not
/// changed since the watermark. Servers without MDTM always deliver.
fn fetch_sync(desc: &FtpDescriptor, since: Option<DateTime<Utc>>) -> EtlResult<Option<Vec<u8>>> {
    let mut ftp = connect_sync(desc, &desc.host)?;

    ftp.transfer_type(suppaftp::types::FileType::Binary)
        .map_err(|e| EtlError::connection(format!("FTP binary mode: {e}")))?;

    if let Some(since) = since {
        if let Ok(modified) = ftp.mdtm(&desc.path) {
            let modified = DateTime::<Utc>::from_naive_utc_and_offset(modified, Utc);
            if modified <= since {
                if let Err(e) = ftp.quit() {
                    warn!("Failed to quit FTP session gracefully: {}", e);
                }
                return Ok(None);
            }
        }
    }

    debug!("Downloading file: {}", desc.path);
    let mut reader = ftp
        .retr_as_buffer(&desc.path)
        .map_err(|e| EtlError::connection(format!("FTP RETR {}: {}", desc.path, e)))?;

    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    debug!("Downloaded {} bytes from {}", data.len(), desc.path);

    if let Err(e) = ftp.quit() {
        warn!("Failed to quit FTP session gracefully: {}", e);
    }

    Ok(Some(data))
}

fn connect_sync(desc: &FtpDescriptor, source_name: &str) -> EtlResult<FtpStream> {
    debug!("Connecting to FTP server: {}:{}", desc.host, desc.port);
    let mut ftp = FtpStream::connect(format!("{}:{}", desc.host, desc.port)).map_err(|e| {
        EtlError::connection(format!(
            "source '{}' FTP {}:{}: {}",
            source_name, desc.host, desc.port, e
        ))
    })?;

    // Extended Passive Mode works better through NAT and container
    // networking than standard PASV.
    ftp.set_mode(suppaftp::Mode::ExtendedPassive);

    ftp.login(&desc.username, &desc.password)
        .map_err(|e| EtlError::connection(format!("FTP login as '{}': {}", desc.username, e)))?;

    Ok(ftp)
}

/// Decode a JSON drop: an array, an object with a `data` array, or
/// newline-delimited JSON.
fn send_json_records(
    bytes: &[u8],
    source: &Source,
    tx: &mpsc::Sender<EtlResult<RawRecord>>,
) -> EtlResult<()> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| EtlError::format(format!("payload is not UTF-8: {e}")))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(());
    }

    let send = |payload: serde_json::Value| {
        let record = RawRecord::new(source.id, source.name.clone(), payload);
        tx.blocking_send(Ok(record)).is_ok()
    };

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Array(items)) => {
            for item in items {
                if !send(item) {
                    return Ok(());
                }
            }
            Ok(())
        }
        Ok(serde_json::Value::Object(mut map)) => {
            match map.remove("data") {
                Some(serde_json::Value::Array(items)) => {
                    for item in items {
                        if !send(item) {
                            return Ok(());
                        }
                    }
                }
                Some(other) => {
                    send(other);
                }
                None => {
                    send(serde_json::Value::Object(map));
                }
            }
            Ok(())
        }
        Ok(other) => Err(EtlError::format(format!(
            "drop from '{}' is not a record collection: {}",
            source.name, other
        ))),
        Err(_) => {
            // Not one document; treat as NDJSON.
            for line in trimmed.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let payload: serde_json::Value = serde_json::from_str(line).map_err(|e| {
                    EtlError::format(format!("malformed line in drop from '{}': {}", source.name, e))
                })?;
                if !send(payload) {
                    return Ok(());
                }
            }
            Ok(())
        }
    }
}
