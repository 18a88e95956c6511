//! Canonical transformation
//!
//! Maps validated raw payloads onto the canonical marketing record. The
//! transformer is pure: same record in, same record out, no clock and no
//! I/O anywhere. Field names are resolved through the alias tables below
//! so the regional feeds (which speak Spanish) land in the same schema
//! as everything else. A payload whose shape cannot be mapped raises a
//! schema mismatch, which fails the run; record-level quality problems
//! are the validator's job, not ours.

use super::error::{EtlError, EtlResult};
use super::record::{CanonicalRecord, RawRecord};
use super::source::Source;
use super::validate::{lookup, parse_date, parse_number};

const ENTITY_ALIASES: [&str; 5] = ["entity_id", "id", "sku", "codigo", "entity"];
const VALUE_ALIASES: [&str; 6] = ["value", "importe", "amount", "valor", "quantity", "cantidad"];
const DATE_ALIASES: [&str; 5] = ["date", "fecha", "occurred_on", "day", "timestamp"];
const CATEGORY_ALIASES: [&str; 4] = ["category", "categoria", "type", "tipo"];

/// Maps raw records into the canonical schema.
#[derive(Debug, Default)]
pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }

    /// Transform one record. Fails with a schema mismatch when the
    /// payload cannot be mapped onto the canonical schema.
    pub fn transform(&self, source: &Source, record: &RawRecord) -> EtlResult<CanonicalRecord> {
        let obj = record.payload.as_object().ok_or_else(|| {
            EtlError::schema_mismatch(format!(
                "record from '{}' is not an object",
                record.source_name
            ))
        })?;

        let entity_id = lookup(obj, ENTITY_ALIASES.into_iter())
            .and_then(value_to_text)
            .ok_or_else(|| {
                EtlError::schema_mismatch(format!(
                    "record from '{}' has no entity identifier",
                    record.source_name
                ))
            })?;

        let value = lookup(obj, VALUE_ALIASES.into_iter())
            .and_then(value_to_number)
            .ok_or_else(|| {
                EtlError::schema_mismatch(format!(
                    "record from '{}' has no numeric value",
                    record.source_name
                ))
            })?;

        let occurred_on = lookup(obj, DATE_ALIASES.into_iter())
            .and_then(|v| v.as_str())
            .and_then(parse_date)
            .ok_or_else(|| {
                EtlError::schema_mismatch(format!(
                    "record from '{}' has no business date",
                    record.source_name
                ))
            })?;

        let category = match lookup(obj, CATEGORY_ALIASES.into_iter()).and_then(value_to_text) {
            Some(raw) => normalize_category(&raw),
            None => source
                .default_category()
                .map(normalize_category)
                .ok_or_else(|| {
                    EtlError::schema_mismatch(format!(
                        "record from '{}' has no category and the source declares no default",
                        record.source_name
                    ))
                })?,
        };

        let attributes = leftover_attributes(obj);
        let fingerprint = CanonicalRecord::compute_fingerprint(&entity_id, occurred_on);

        Ok(CanonicalRecord {
            source_id: record.source_id,
            source_name: record.source_name.clone(),
            category,
            entity_id,
            value,
            occurred_on,
            attributes,
            fingerprint,
            content_hash: record.content_hash.clone(),
            ingested_at: record.ingested_at,
        })
    }
}

/// Canonical category vocabulary, with the Spanish feed names folded in.
fn normalize_category(raw: &str) -> String {
    let token = raw.trim().to_ascii_lowercase();
    match token.as_str() {
        "ventas" | "venta" => "sales".to_string(),
        "existencias" | "existencia" => "stock".to_string(),
        "clientes" | "cliente" => "customers".to_string(),
        "productos" | "producto" => "products".to_string(),
        _ => token,
    }
}

fn value_to_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Fields the canonical mapping did not consume, kept for downstream
/// reporting.
fn leftover_attributes(
    obj: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    let consumed = ENTITY_ALIASES
        .iter()
        .chain(VALUE_ALIASES.iter())
        .chain(DATE_ALIASES.iter())
        .chain(CATEGORY_ALIASES.iter());
    let consumed: Vec<&str> = consumed.copied().collect();

    let mut rest = serde_json::Map::new();
    for (key, value) in obj {
        let is_consumed = consumed.iter().any(|c| key.eq_ignore_ascii_case(c));
        if !is_consumed && !value.is_null() {
            rest.insert(key.clone(), value.clone());
        }
    }
    serde_json::Value::Object(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::source::{SourceFormat, SourceType};
    use chrono::{NaiveDate, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn source_with(connection: serde_json::Value) -> Source {
        Source {
            id: Uuid::new_v4(),
            name: "feed".to_string(),
            source_type: SourceType::Json,
            connection,
            format: SourceFormat::Json,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn raw(source: &Source, payload: serde_json::Value) -> RawRecord {
        RawRecord::new(source.id, source.name.clone(), payload)
    }

    #[test]
    fn test_spanish_feed_maps_to_canonical_schema() {
        let source = source_with(json!({}));
        let record = raw(
            &source,
            json!({
                "codigo": "sku-9",
                "importe": "10,5",
                "fecha": "01/03/2024",
                "categoria": "Ventas",
                "tienda": "madrid-01"
            }),
        );

        let canonical = Transformer::new().transform(&source, &record).unwrap();
        assert_eq!(canonical.entity_id, "sku-9");
        assert_eq!(canonical.value, 10.5);
        assert_eq!(
            canonical.occurred_on,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(canonical.category, "sales");
        assert_eq!(canonical.attributes["tienda"], "madrid-01");
        assert!(canonical.attributes.get("importe").is_none());
    }

    #[test]
    fn test_numeric_entity_id_becomes_text() {
        let source = source_with(json!({}));
        let record = raw(
            &source,
            json!({"id": 1234, "value": 5, "date": "2024-03-01", "category": "stock"}),
        );
        let canonical = Transformer::new().transform(&source, &record).unwrap();
        assert_eq!(canonical.entity_id, "1234");
        assert_eq!(canonical.category, "stock");
    }

    #[test]
    fn test_default_category_from_source() {
        let source = source_with(json!({"default_category": "Existencias"}));
        let record = raw(&source, json!({"id": "a", "value": 5, "date": "2024-03-01"}));
        let canonical = Transformer::new().transform(&source, &record).unwrap();
        assert_eq!(canonical.category, "stock");
    }

    #[test]
    fn test_missing_category_without_default_is_schema_mismatch() {
        let source = source_with(json!({}));
        let record = raw(&source, json!({"id": "a", "value": 5, "date": "2024-03-01"}));
        let err = Transformer::new().transform(&source, &record).unwrap_err();
        assert!(matches!(err, EtlError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_unmappable_value_is_schema_mismatch() {
        let source = source_with(json!({"default_category": "sales"}));
        let record = raw(&source, json!({"id": "a", "date": "2024-03-01"}));
        let err = Transformer::new().transform(&source, &record).unwrap_err();
        assert!(matches!(err, EtlError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_transform_is_deterministic() {
        let source = source_with(json!({}));
        let record = raw(
            &source,
            json!({"id": "a", "importe": 7, "fecha": "2024-03-01", "tipo": "clientes"}),
        );

        let transformer = Transformer::new();
        let first = transformer.transform(&source, &record).unwrap();
        let second = transformer.transform(&source, &record).unwrap();

        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.ingested_at, second.ingested_at);
        assert_eq!(first.category, "customers");
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn test_timestamp_field_supplies_business_date() {
        let source = source_with(json!({"default_category": "sales"}));
        let record = raw(
            &source,
            json!({"id": "a", "value": 1, "timestamp": "2024-03-01T18:30:00Z"}),
        );
        let canonical = Transformer::new().transform(&source, &record).unwrap();
        assert_eq!(
            canonical.occurred_on,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }
}
