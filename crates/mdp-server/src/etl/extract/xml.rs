//! XML extraction for file-drop sources
//!
//! Streams through the document with the quick-xml event reader and
//! turns every occurrence of the configured record element into a JSON
//! object: attributes and child-element text become fields. Feeds are
//! expected to be flat; nested structures flatten to their leaf text.

use std::io::Read;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::{descriptor, empty_stream, spawn_blocking_stream, Extractor, RecordStream};
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::record::RawRecord;
use crate::etl::source::{Source, SourceType};

#[derive(Debug, Clone, Deserialize)]
struct XmlDescriptor {
    /// Path of the dropped file, `.gz` suffix means gzip-compressed
    path: String,
    /// Element name that delimits one record
    #[serde(default = "default_record_element")]
    record_element: String,
}

fn default_record_element() -> String {
    "record".to_string()
}

/// Adapter for `xml` sources.
#[derive(Debug, Default)]
pub struct XmlExtractor;

impl XmlExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for XmlExtractor {
    fn source_type(&self) -> SourceType {
        SourceType::Xml
    }

    async fn probe(&self, source: &Source) -> EtlResult<()> {
        let desc: XmlDescriptor = descriptor(source)?;
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
        let desc: XmlDescriptor = descriptor(source)?;
        let meta = tokio::fs::metadata(&desc.path).await?;

        if let (Some(since), Ok(modified)) = (since, meta.modified()) {
            let modified: DateTime<Utc> = modified.into();
            if modified <= since {
                debug!("Skipping '{}': file unchanged since {}", source.name, since);
                return Ok(empty_stream());
            }
        }

        let source = source.clone();
        Ok(spawn_blocking_stream(move |tx| {
            let raw = std::fs::read(&desc.path)?;
            let bytes = if desc.path.ends_with(".gz") {
                let mut decoded = Vec::new();
                GzDecoder::new(&raw[..])
                    .read_to_end(&mut decoded)
                    .map_err(|e| EtlError::format(format!("bad gzip data: {e}")))?;
                decoded
            } else {
                raw
            };
            send_xml_records(&bytes, &desc.record_element, &source, tx)
        }))
    }
}

/// Decode records from an XML document and push them downstream.
///
/// Also used by the FTP adapter for XML payloads it has already
/// downloaded. Stops at the first malformed construct.
pub(crate) fn send_xml_records(
    bytes: &[u8],
    record_element: &str,
    source: &Source,
    tx: &mpsc::Sender<EtlResult<RawRecord>>,
) -> EtlResult<()> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) if local_name(start.name().as_ref()) == record_element => {
                let mut map = serde_json::Map::new();
                collect_attributes(&start, &mut map)?;
                read_record_children(&mut reader, record_element, &mut map)?;

                let record = RawRecord::new(
                    source.id,
                    source.name.clone(),
                    serde_json::Value::Object(map),
                );
                if tx.blocking_send(Ok(record)).is_err() {
                    return Ok(());
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Read child elements up to the record's closing tag.
fn read_record_children(
    reader: &mut Reader<&[u8]>,
    record_element: &str,
    map: &mut serde_json::Map<String, serde_json::Value>,
) -> EtlResult<()> {
    let mut buf = Vec::new();
    let mut open_child: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(child) => {
                open_child = Some(local_name(child.name().as_ref()));
            }
            Event::Empty(child) => {
                map.insert(
                    local_name(child.name().as_ref()),
                    serde_json::Value::String(String::new()),
                );
            }
            Event::Text(text) => {
                if let Some(name) = &open_child {
                    let value = decode_text(&text)?;
                    if !value.trim().is_empty() {
                        map.insert(
                            name.clone(),
                            serde_json::Value::String(value.trim().to_string()),
                        );
                    }
                }
            }
            Event::End(end) => {
                if local_name(end.name().as_ref()) == record_element {
                    return Ok(());
                }
                open_child = None;
            }
            Event::Eof => {
                return Err(EtlError::format(format!(
                    "document ended inside a <{record_element}> element"
                )));
            }
            _ => {}
        }
        buf.clear();
    }
}

fn collect_attributes(
    start: &BytesStart<'_>,
    map: &mut serde_json::Map<String, serde_json::Value>,
) -> EtlResult<()> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| EtlError::format(format!("bad XML attribute: {e}")))?;
        let key = local_name(attr.key.as_ref());
        let raw = String::from_utf8_lossy(&attr.value);
        let value = quick_xml::escape::unescape(&raw)
            .map_err(|e| EtlError::format(format!("bad XML escape: {e}")))?;
        map.insert(key, serde_json::Value::String(value.into_owned()));
    }
    Ok(())
}

fn decode_text(text: &BytesText<'_>) -> EtlResult<String> {
    let raw = String::from_utf8_lossy(text.as_ref());
    let unescaped = quick_xml::escape::unescape(&raw)
        .map_err(|e| EtlError::format(format!("bad XML escape: {e}")))?;
    Ok(unescaped.into_owned())
}

/// Element or attribute name without any namespace prefix.
fn local_name(qname: &[u8]) -> String {
    let name = match qname.iter().rposition(|&b| b == b':') {
        Some(pos) => &qname[pos + 1..],
        None => qname,
    };
    String::from_utf8_lossy(name).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::source::SourceFormat;
    use futures::StreamExt;
    use serde_json::json;
    use uuid::Uuid;

    fn source_for(path: &std::path::Path, record_element: &str) -> Source {
        Source {
            id: Uuid::new_v4(),
            name: "export".to_string(),
            source_type: SourceType::Xml,
            connection: json!({
                "path": path.to_string_lossy(),
                "record_element": record_element,
            }),
            format: SourceFormat::Xml,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_extract_records_with_attributes_and_children() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.xml");
        std::fs::write(
            &path,
            r#"<?xml version="1.0"?>
            <export>
              <venta id="sku-1">
                <importe>10.5</importe>
                <fecha>2024-03-01</fecha>
              </venta>
              <venta id="sku-2">
                <importe>7</importe>
                <fecha>2024-03-02</fecha>
              </venta>
            </export>"#,
        )
        .unwrap();

        let extractor = XmlExtractor::new();
        let source = source_for(&path, "venta");
        let records: Vec<_> = extractor
            .extract(&source, None)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(records.len(), 2);
        let first = records[0].as_ref().unwrap();
        assert_eq!(first.payload["id"], "sku-1");
        assert_eq!(first.payload["importe"], "10.5");
        assert_eq!(first.payload["fecha"], "2024-03-01");
    }

    #[tokio::test]
    async fn test_entities_are_unescaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.xml");
        std::fs::write(
            &path,
            "<export><record><name>Jamón &amp; Queso</name></record></export>",
        )
        .unwrap();

        let extractor = XmlExtractor::new();
        let source = source_for(&path, "record");
        let records: Vec<_> = extractor
            .extract(&source, None)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap().payload["name"], "Jamón & Queso");
    }

    #[tokio::test]
    async fn test_truncated_document_keeps_prior_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.xml");
        std::fs::write(
            &path,
            "<export><record><importe>10</importe></record><record><importe>",
        )
        .unwrap();

        let extractor = XmlExtractor::new();
        let source = source_for(&path, "record");
        let items: Vec<_> = extractor
            .extract(&source, None)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(EtlError::Format { .. })));
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let extractor = XmlExtractor::new();
        let mut source = source_for(std::path::Path::new("/nonexistent/export.xml"), "record");
        source.connection = json!({ "path": "/nonexistent/export.xml" });

        let err = extractor.probe(&source).await.unwrap_err();
        assert!(matches!(err, EtlError::Connection { .. }));
    }
}
