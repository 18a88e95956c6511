//! Record validation
//!
//! Validation is a total function: every record comes back either
//! accepted or rejected with a machine-readable reason, and no payload,
//! however broken, makes the validator itself fail. Rules are
//! declarative and per-source; a source may carry its own rule list in
//! its connection descriptor under `rules`, otherwise the default
//! marketing-feed rules apply.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::record::RawRecord;
use super::source::Source;

/// Why a record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Payload is not a JSON object
    MalformedPayload,
    /// Payload carries no usable values at all
    EmptyPayload,
    /// A required field is absent under every known alias
    MissingField,
    /// A field is present but not of the declared kind
    TypeMismatch,
    /// A numeric field is outside its declared bounds
    OutOfRange,
}

impl RejectReason {
    pub fn code(&self) -> &str {
        match self {
            RejectReason::MalformedPayload => "MALFORMED_PAYLOAD",
            RejectReason::EmptyPayload => "EMPTY_PAYLOAD",
            RejectReason::MissingField => "MISSING_FIELD",
            RejectReason::TypeMismatch => "TYPE_MISMATCH",
            RejectReason::OutOfRange => "OUT_OF_RANGE",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Kind a rule checks a field against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Date,
}

/// One declarative validation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    /// Canonical field name
    pub field: String,
    /// Alternative names the field may arrive under
    #[serde(default)]
    pub aliases: Vec<String>,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Lower bound for number fields
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper bound for number fields
    #[serde(default)]
    pub max: Option<f64>,
}

fn default_required() -> bool {
    true
}

impl FieldRule {
    pub fn new(field: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            field: field.into(),
            aliases: Vec::new(),
            kind,
            required: true,
            min: None,
            max: None,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.field.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Rules applied when a source declares none of its own.
pub fn default_rules() -> Vec<FieldRule> {
    vec![
        FieldRule::new("entity_id", FieldKind::Text)
            .with_aliases(["id", "sku", "codigo", "entity"]),
        FieldRule::new("value", FieldKind::Number)
            .with_aliases(["importe", "amount", "valor", "quantity", "cantidad"]),
        FieldRule::new("date", FieldKind::Date)
            .with_aliases(["fecha", "occurred_on", "day", "timestamp"]),
    ]
}

/// A rejected record: the payload itself is not kept, only what is
/// needed to account for it.
#[derive(Debug, Clone)]
pub struct RejectedRecord {
    pub content_hash: String,
    pub reason: RejectReason,
    pub detail: String,
}

/// Outcome of validating one batch.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<RawRecord>,
    pub rejected: Vec<RejectedRecord>,
}

impl ValidationOutcome {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    /// Share of records rejected, 0.0 for an empty batch.
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.rejected.len() as f64 / total as f64
        }
    }

    /// Whether the batch is bad enough to abort the run.
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.rejection_rate() > threshold
    }
}

/// Applies rules to raw records.
#[derive(Debug, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Rules for the given source: its own declared list, or the
    /// defaults.
    pub fn rules_for(&self, source: &Source) -> Vec<FieldRule> {
        match source.connection.get("rules") {
            Some(raw) => match serde_json::from_value::<Vec<FieldRule>>(raw.clone()) {
                Ok(rules) if !rules.is_empty() => rules,
                Ok(_) => default_rules(),
                Err(e) => {
                    debug!(
                        "Ignoring unparseable rules for source '{}': {}",
                        source.name, e
                    );
                    default_rules()
                }
            },
            None => default_rules(),
        }
    }

    /// Classify every record as accepted or rejected. Never fails.
    pub fn validate(&self, records: Vec<RawRecord>, rules: &[FieldRule]) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        for record in records {
            match check_record(&record, rules) {
                Ok(()) => outcome.accepted.push(record),
                Err((reason, detail)) => outcome.rejected.push(RejectedRecord {
                    content_hash: record.content_hash.clone(),
                    reason,
                    detail,
                }),
            }
        }
        outcome
    }
}

fn check_record(record: &RawRecord, rules: &[FieldRule]) -> Result<(), (RejectReason, String)> {
    let obj = match record.payload.as_object() {
        Some(obj) => obj,
        None => {
            return Err((
                RejectReason::MalformedPayload,
                "payload is not an object".to_string(),
            ))
        }
    };

    let has_content = obj.values().any(|v| match v {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.trim().is_empty(),
        _ => true,
    });
    if !has_content {
        return Err((
            RejectReason::EmptyPayload,
            "payload carries no values".to_string(),
        ));
    }

    for rule in rules {
        let value = lookup(obj, rule.names());
        match value {
            None => {
                if rule.required {
                    return Err((
                        RejectReason::MissingField,
                        format!("required field '{}' is missing", rule.field),
                    ));
                }
            }
            Some(value) => check_field(rule, value)?,
        }
    }

    Ok(())
}

fn check_field(rule: &FieldRule, value: &serde_json::Value) -> Result<(), (RejectReason, String)> {
    match rule.kind {
        FieldKind::Text => match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Ok(()),
            serde_json::Value::Number(_) => Ok(()),
            _ => Err((
                RejectReason::TypeMismatch,
                format!("field '{}' is not usable text", rule.field),
            )),
        },
        FieldKind::Number => {
            let number = match value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => parse_number(s),
                _ => None,
            };
            let number = number.ok_or_else(|| {
                (
                    RejectReason::TypeMismatch,
                    format!("field '{}' is not a number", rule.field),
                )
            })?;

            if let Some(min) = rule.min {
                if number < min {
                    return Err((
                        RejectReason::OutOfRange,
                        format!("field '{}' is below {}", rule.field, min),
                    ));
                }
            }
            if let Some(max) = rule.max {
                if number > max {
                    return Err((
                        RejectReason::OutOfRange,
                        format!("field '{}' is above {}", rule.field, max),
                    ));
                }
            }
            Ok(())
        }
        FieldKind::Date => {
            let parsed = value.as_str().and_then(parse_date);
            if parsed.is_none() {
                return Err((
                    RejectReason::TypeMismatch,
                    format!("field '{}' is not a recognizable date", rule.field),
                ));
            }
            Ok(())
        }
    }
}

/// Case-insensitive field lookup across a list of candidate names.
pub(crate) fn lookup<'a, 'n>(
    obj: &'a serde_json::Map<String, serde_json::Value>,
    names: impl Iterator<Item = &'n str>,
) -> Option<&'a serde_json::Value> {
    for name in names {
        for (key, value) in obj {
            if key.eq_ignore_ascii_case(name) && !value.is_null() {
                return Some(value);
            }
        }
    }
    None
}

/// Parse a number, tolerating the comma decimal separator used by some
/// of our regional feeds.
pub(crate) fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if let Ok(n) = trimmed.parse::<f64>() {
        return Some(n);
    }
    if trimmed.contains(',') && !trimmed.contains('.') {
        return trimmed.replace(',', ".").parse::<f64>().ok();
    }
    None
}

/// Parse a business date in the formats our feeds actually use.
pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    // Full timestamps carry the date up front.
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(datetime.date_naive());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn raw(payload: serde_json::Value) -> RawRecord {
        RawRecord::new(Uuid::new_v4(), "feed", payload)
    }

    #[test]
    fn test_good_record_is_accepted() {
        let validator = Validator::new();
        let outcome = validator.validate(
            vec![raw(json!({"id": "sku-1", "importe": 10.5, "fecha": "2024-03-01"}))],
            &default_rules(),
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn test_numeric_string_and_comma_decimal_accepted() {
        let validator = Validator::new();
        let outcome = validator.validate(
            vec![
                raw(json!({"id": "a", "importe": "10.5", "fecha": "2024-03-01"})),
                raw(json!({"id": "b", "importe": "10,5", "fecha": "01/03/2024"})),
            ],
            &default_rules(),
        );
        assert_eq!(outcome.accepted.len(), 2);
    }

    #[test]
    fn test_reject_reasons() {
        let validator = Validator::new();
        let outcome = validator.validate(
            vec![
                raw(json!("just a string")),
                raw(json!({"id": null, "importe": "", "fecha": null})),
                raw(json!({"importe": 5, "fecha": "2024-03-01"})),
                raw(json!({"id": "a", "importe": "not a number", "fecha": "2024-03-01"})),
                raw(json!({"id": "a", "importe": 5, "fecha": "el tres de marzo"})),
            ],
            &default_rules(),
        );

        assert!(outcome.accepted.is_empty());
        let reasons: Vec<_> = outcome.rejected.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RejectReason::MalformedPayload,
                RejectReason::EmptyPayload,
                RejectReason::MissingField,
                RejectReason::TypeMismatch,
                RejectReason::TypeMismatch,
            ]
        );
    }

    #[test]
    fn test_range_rule() {
        let validator = Validator::new();
        let rules = vec![FieldRule::new("importe", FieldKind::Number)
            .with_min(0.0)
            .with_max(100.0)];

        let outcome = validator.validate(
            vec![
                raw(json!({"importe": 50})),
                raw(json!({"importe": -1})),
                raw(json!({"importe": 250})),
            ],
            &rules,
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected.len(), 2);
        assert!(outcome
            .rejected
            .iter()
            .all(|r| r.reason == RejectReason::OutOfRange));
    }

    #[test]
    fn test_alias_and_case_insensitive_lookup() {
        let validator = Validator::new();
        let outcome = validator.validate(
            vec![raw(json!({"SKU": "a", "Cantidad": 3, "Timestamp": "2024-03-01T10:00:00Z"}))],
            &default_rules(),
        );
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn test_optional_field_may_be_absent_but_not_wrong() {
        let validator = Validator::new();
        let rules = vec![FieldRule::new("segment", FieldKind::Number).optional()];

        let outcome = validator.validate(
            vec![raw(json!({"other": 1})), raw(json!({"segment": "abc"}))],
            &rules,
        );
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].reason, RejectReason::TypeMismatch);
    }

    #[test]
    fn test_rejection_rate_and_threshold() {
        let validator = Validator::new();
        let mut records = Vec::new();
        for i in 0..6 {
            records.push(raw(json!({"id": format!("sku-{i}"), "importe": 1, "fecha": "2024-03-01"})));
        }
        for _ in 0..4 {
            records.push(raw(json!({"importe": 1, "fecha": "2024-03-01"})));
        }

        let outcome = validator.validate(records, &default_rules());
        assert_eq!(outcome.total(), 10);
        assert!((outcome.rejection_rate() - 0.4).abs() < f64::EPSILON);
        assert!(!outcome.exceeds(0.5));
        assert!(outcome.exceeds(0.3));
    }

    #[test]
    fn test_empty_batch_rate_is_zero() {
        let outcome = ValidationOutcome::default();
        assert_eq!(outcome.rejection_rate(), 0.0);
        assert!(!outcome.exceeds(0.5));
    }

    #[test]
    fn test_validator_never_panics_on_hostile_payloads() {
        let validator = Validator::new();
        let hostile = vec![
            raw(json!(null)),
            raw(json!([1, 2, 3])),
            raw(json!(42)),
            raw(json!({"deep": {"nested": {"thing": [null]}}})),
            raw(json!({"id": {"not": "text"}, "importe": [], "fecha": 7})),
        ];
        let outcome = validator.validate(hostile, &default_rules());
        assert_eq!(outcome.total(), 5);
        assert!(outcome.accepted.is_empty());
    }

    #[test]
    fn test_source_rules_override_defaults() {
        use crate::etl::source::{SourceFormat, SourceType};
        let source = Source {
            id: Uuid::new_v4(),
            name: "strict".to_string(),
            source_type: SourceType::Json,
            connection: json!({
                "url": "http://example.com/feed",
                "rules": [
                    {"field": "importe", "kind": "number", "min": 0.0}
                ]
            }),
            format: SourceFormat::Json,
            active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let validator = Validator::new();
        let rules = validator.rules_for(&source);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].field, "importe");
        assert_eq!(rules[0].min, Some(0.0));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_date("2024-03-01"), Some(expected));
        assert_eq!(parse_date("01/03/2024"), Some(expected));
        assert_eq!(parse_date("2024/03/01"), Some(expected));
        assert_eq!(parse_date("2024-03-01T09:30:00+01:00"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }
}
