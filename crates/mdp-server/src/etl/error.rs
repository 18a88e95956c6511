//! Error taxonomy for the ETL pipeline
//!
//! Every failure a pipeline run can surface is one of these variants, so
//! callers can match on the class of failure instead of parsing message
//! strings. Retry policy keys off [`EtlError::is_retryable`].

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result alias used throughout the ETL modules.
pub type EtlResult<T> = Result<T, EtlError>;

/// Failure classes for extraction, validation, transformation and
/// run coordination.
#[derive(Debug, Error)]
pub enum EtlError {
    /// The source could not be reached (network, FTP, file or database
    /// connectivity). Transient by definition, so retryable.
    #[error("connection to source failed: {message}")]
    Connection { message: String },

    /// The source was reachable but its payload could not be decoded
    /// (malformed JSON, broken CSV quoting, truncated XML, bad gzip).
    #[error("payload could not be decoded: {message}")]
    Format { message: String },

    /// A record shape the transformer does not know how to map.
    #[error("record does not match any known schema: {message}")]
    SchemaMismatch { message: String },

    /// Too large a share of extracted records failed validation.
    #[error(
        "data quality abort: {rejected} of {total} records rejected (threshold {threshold:.2})"
    )]
    DataQualityAbort {
        rejected: u64,
        total: u64,
        threshold: f64,
    },

    /// Another non-terminal run already holds the scope.
    #[error("a run for scope '{scope}' is already active (started {active_started_at})")]
    ConcurrencyConflict {
        scope: String,
        active_started_at: DateTime<Utc>,
    },

    /// The run was cancelled by an operator.
    #[error("run was cancelled")]
    Cancelled,

    /// A stage exceeded its deadline.
    #[error("stage '{stage}' timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    /// The requested source or scope does not exist in the registry.
    #[error("unknown source '{name}'")]
    UnknownSource { name: String },

    /// Persistence layer failure (run log or record sink).
    #[error("storage error: {0}")]
    Storage(String),
}

impl EtlError {
    /// Connection failures are the only retryable class; everything else
    /// is deterministic and retrying would just repeat the failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EtlError::Connection { .. })
    }

    pub fn connection(message: impl Into<String>) -> Self {
        EtlError::Connection {
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        EtlError::Format {
            message: message.into(),
        }
    }

    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        EtlError::SchemaMismatch {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        EtlError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::Connection {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EtlError::Format {
                message: err.to_string(),
            }
        } else {
            EtlError::Connection {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Format {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for EtlError {
    fn from(err: csv::Error) -> Self {
        // The csv crate wraps IO errors from the underlying reader; those
        // are connectivity problems, everything else is a malformed file.
        if err.is_io_error() {
            EtlError::Connection {
                message: err.to_string(),
            }
        } else {
            EtlError::Format {
                message: err.to_string(),
            }
        }
    }
}

impl From<quick_xml::Error> for EtlError {
    fn from(err: quick_xml::Error) -> Self {
        EtlError::Format {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_are_retryable() {
        assert!(EtlError::connection("refused").is_retryable());
        assert!(!EtlError::format("bad json").is_retryable());
        assert!(!EtlError::Cancelled.is_retryable());
        assert!(!EtlError::DataQualityAbort {
            rejected: 60,
            total: 100,
            threshold: 0.5,
        }
        .is_retryable());
        assert!(!EtlError::Timeout {
            stage: "enrich".to_string(),
            seconds: 300,
        }
        .is_retryable());
    }

    #[test]
    fn test_quality_abort_message_includes_counts() {
        let err = EtlError::DataQualityAbort {
            rejected: 51,
            total: 100,
            threshold: 0.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("51"));
        assert!(msg.contains("100"));
        assert!(msg.contains("0.50"));
    }

    #[test]
    fn test_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: EtlError = io.into();
        assert!(matches!(err, EtlError::Connection { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_json_error_maps_to_format() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: EtlError = parse.into();
        assert!(matches!(err, EtlError::Format { .. }));
    }
}
