//! HTTP extraction for API and JSON document sources
//!
//! Both source types share the transport; they differ in how the feed is
//! addressed. An `api` source is an endpoint that understands an
//! incremental `since` query parameter, a `json` source is a plain
//! document fetched as-is.
//!
//! Payloads may be a JSON array, an object with a `data` array, a single
//! object, or newline-delimited JSON. NDJSON is decoded line by line as
//! the body arrives; the other shapes are buffered and decoded whole.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{descriptor, Extractor, RecordStream, CHANNEL_CAPACITY};
use crate::etl::config::EtlConfig;
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::record::RawRecord;
use crate::etl::source::{Source, SourceType};

#[derive(Debug, Deserialize)]
struct HttpDescriptor {
    /// Endpoint or document URL
    url: String,
    /// Optional bearer token
    #[serde(default)]
    token: Option<String>,
    /// Query parameter carrying the incremental watermark (api sources)
    #[serde(default = "default_since_param")]
    since_param: String,
}

fn default_since_param() -> String {
    "since".to_string()
}

/// Adapter for `api` and `json` sources.
pub struct HttpExtractor {
    client: Client,
    config: EtlConfig,
    serves: SourceType,
}

impl HttpExtractor {
    pub fn for_api(config: EtlConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            serves: SourceType::Api,
        }
    }

    pub fn for_json(config: EtlConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            serves: SourceType::Json,
        }
    }

    fn request(
        &self,
        desc: &HttpDescriptor,
        since: Option<DateTime<Utc>>,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(&desc.url)
            .timeout(self.config.extract_timeout());
        if let Some(token) = &desc.token {
            req = req.bearer_auth(token);
        }
        if self.serves == SourceType::Api {
            if let Some(since) = since {
                req = req.query(&[(desc.since_param.as_str(), since.to_rfc3339())]);
            }
        }
        req
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    fn source_type(&self) -> SourceType {
        self.serves
    }

    async fn probe(&self, source: &Source) -> EtlResult<()> {
        let desc: HttpDescriptor = descriptor(source)?;

        let mut head = self
            .client
            .head(&desc.url)
            .timeout(self.config.extract_timeout());
        if let Some(token) = &desc.token {
            head = head.bearer_auth(token);
        }

        let status = match head.send().await {
            Ok(resp) => resp.status(),
            Err(e) => return Err(e.into()),
        };

        if status.is_success() {
            return Ok(());
        }

        // Some endpoints refuse HEAD outright; fall back to a GET and
        // drop the body unread.
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            let resp = self.request(&desc, None).send().await?;
            if resp.status().is_success() {
                return Ok(());
            }
            return Err(EtlError::connection(format!(
                "source '{}' answered {} to probe",
                source.name,
                resp.status()
            )));
        }

        Err(EtlError::connection(format!(
            "source '{}' answered {} to probe",
            source.name, status
        )))
    }

    async fn extract(
        &self,
        source: &Source,
        since: Option<DateTime<Utc>>,
    ) -> EtlResult<RecordStream> {
        let desc: HttpDescriptor = descriptor(source)?;

        let resp = self.request(&desc, since).send().await?;
        if !resp.status().is_success() {
            return Err(EtlError::connection(format!(
                "source '{}' answered {}",
                source.name,
                resp.status()
            )));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let source = source.clone();
        tokio::spawn(async move {
            decode_body(resp, &source, &tx).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

enum BodyMode {
    Undecided,
    Lines,
    Document,
}

async fn decode_body(
    resp: reqwest::Response,
    source: &Source,
    tx: &mpsc::Sender<EtlResult<RawRecord>>,
) {
    let mut body = resp.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    let mut mode = BodyMode::Undecided;

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };
        buf.extend_from_slice(&bytes);

        if matches!(mode, BodyMode::Undecided) {
            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                // NDJSON iff the first line is a complete JSON value on
                // its own; anything else is a multi-line document.
                let first = trim_bytes(&buf[..pos]);
                mode = if !first.is_empty()
                    && serde_json::from_slice::<serde_json::Value>(first).is_ok()
                {
                    BodyMode::Lines
                } else {
                    BodyMode::Document
                };
            }
        }

        if matches!(mode, BodyMode::Lines) {
            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if !send_line(tx, source, &line).await {
                    return;
                }
            }
        }
    }

    match mode {
        BodyMode::Lines => {
            let rest = std::mem::take(&mut buf);
            send_line(tx, source, &rest).await;
        }
        BodyMode::Undecided | BodyMode::Document => {
            send_document(tx, source, &buf).await;
        }
    }
}

/// Decode one NDJSON line. Returns false when the consumer is gone or
/// the line was malformed (which ends the stream with that error).
async fn send_line(
    tx: &mpsc::Sender<EtlResult<RawRecord>>,
    source: &Source,
    line: &[u8],
) -> bool {
    let trimmed = trim_bytes(line);
    if trimmed.is_empty() {
        return true;
    }
    match serde_json::from_slice::<serde_json::Value>(trimmed) {
        Ok(payload) => tx
            .send(Ok(RawRecord::new(source.id, source.name.clone(), payload)))
            .await
            .is_ok(),
        Err(e) => {
            let _ = tx
                .send(Err(EtlError::format(format!(
                    "malformed line in feed from '{}': {}",
                    source.name, e
                ))))
                .await;
            false
        }
    }
}

async fn send_document(
    tx: &mpsc::Sender<EtlResult<RawRecord>>,
    source: &Source,
    buf: &[u8],
) {
    let trimmed = trim_bytes(buf);
    if trimmed.is_empty() {
        return;
    }

    let parsed: serde_json::Value = match serde_json::from_slice(trimmed) {
        Ok(value) => value,
        Err(e) => {
            let _ = tx
                .send(Err(EtlError::format(format!(
                    "malformed document from '{}': {}",
                    source.name, e
                ))))
                .await;
            return;
        }
    };

    let records = match parsed {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(serde_json::Value::Array(items)) => items,
            Some(other) => vec![other],
            None => vec![serde_json::Value::Object(map)],
        },
        other => {
            let _ = tx
                .send(Err(EtlError::format(format!(
                    "feed from '{}' is not a record collection: {}",
                    source.name, other
                ))))
                .await;
            return;
        }
    };

    for payload in records {
        let record = RawRecord::new(source.id, source.name.clone(), payload);
        if tx.send(Ok(record)).await.is_err() {
            return;
        }
    }
}

fn trim_bytes(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|p| p + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::source::SourceFormat;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_for(url: String, source_type: SourceType) -> Source {
        Source {
            id: Uuid::new_v4(),
            name: "feed".to_string(),
            source_type,
            connection: json!({ "url": url }),
            format: SourceFormat::Json,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn collect(stream: RecordStream) -> Vec<EtlResult<RawRecord>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_probe_ok_via_head() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::for_json(EtlConfig::default());
        let source = source_for(format!("{}/feed", server.uri()), SourceType::Json);
        assert!(extractor.probe(&source).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_get_when_head_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::for_json(EtlConfig::default());
        let source = source_for(format!("{}/feed", server.uri()), SourceType::Json);
        assert!(extractor.probe(&source).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_reports_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::for_json(EtlConfig::default());
        let source = source_for(format!("{}/feed", server.uri()), SourceType::Json);
        let err = extractor.probe(&source).await.unwrap_err();
        assert!(matches!(err, EtlError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_extract_json_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"id": "a", "importe": 10}, {"id": "b", "importe": 20}]"#),
            )
            .mount(&server)
            .await;

        let extractor = HttpExtractor::for_json(EtlConfig::default());
        let source = source_for(format!("{}/feed", server.uri()), SourceType::Json);
        let records = collect(extractor.extract(&source, None).await.unwrap()).await;

        assert_eq!(records.len(), 2);
        let first = records[0].as_ref().unwrap();
        assert_eq!(first.payload["id"], "a");
        assert_eq!(first.source_id, source.id);
    }

    #[tokio::test]
    async fn test_extract_data_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"data": [{"id": "a"}], "total": 1}"#),
            )
            .mount(&server)
            .await;

        let extractor = HttpExtractor::for_api(EtlConfig::default());
        let source = source_for(format!("{}/feed", server.uri()), SourceType::Api);
        let records = collect(extractor.extract(&source, None).await.unwrap()).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap().payload["id"], "a");
    }

    #[tokio::test]
    async fn test_extract_ndjson_partial_failure_keeps_prior_records() {
        let server = MockServer::start().await;
        let body = "{\"id\": \"a\"}\n{\"id\": \"b\"}\n{broken\n{\"id\": \"d\"}\n";
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::for_json(EtlConfig::default());
        let source = source_for(format!("{}/feed", server.uri()), SourceType::Json);
        let items = collect(extractor.extract(&source, None).await.unwrap()).await;

        // Two good records, then the malformed line ends the stream.
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        assert!(matches!(items[2], Err(EtlError::Format { .. })));
    }

    #[tokio::test]
    async fn test_api_source_passes_watermark_as_query() {
        let server = MockServer::start().await;
        let since = Utc::now();
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(query_param("since", since.to_rfc3339()))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let extractor = HttpExtractor::for_api(EtlConfig::default());
        let source = source_for(format!("{}/feed", server.uri()), SourceType::Api);
        let records = collect(extractor.extract(&source, Some(since)).await.unwrap()).await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_extract_rejects_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let extractor = HttpExtractor::for_json(EtlConfig::default());
        let source = source_for(format!("{}/feed", server.uri()), SourceType::Json);
        let err = extractor.extract(&source, None).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
