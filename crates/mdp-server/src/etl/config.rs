//! ETL pipeline configuration
//!
//! Runtime knobs for the ingestion pipeline: stage deadlines, retry
//! policy, the validation rejection threshold and the optional scheduler.
//! Everything is read from `ETL_*` environment variables with sensible
//! defaults so a bare `mdp-server` start works without any of them set.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main ETL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Whether scheduled automatic runs are enabled
    pub auto_run_enabled: bool,
    /// Interval between scheduled runs in minutes
    pub run_interval_minutes: u64,
    /// Timeout for a single extraction request (HTTP call, FTP retrieval,
    /// database query) in seconds
    pub extract_timeout_secs: u64,
    /// Hard deadline for a whole pipeline stage in seconds
    pub stage_timeout_secs: u64,
    /// Timeout for a single enrichment lookup in seconds
    pub lookup_timeout_secs: u64,
    /// Fraction of rejected records above which a run aborts, in (0, 1]
    pub rejection_threshold: f64,
    /// Maximum retries for retryable extraction failures
    pub max_retries: u32,
    /// Base delay between retries in seconds (escalates per attempt)
    pub retry_delay_secs: u64,
    /// Days to keep finished runs before the retention sweep removes them
    pub log_retention_days: u32,
    /// Base URL of the enrichment lookup service (None disables lookups)
    pub enrichment_url: Option<String>,
    /// Webhook notified when a run finishes (None disables notification)
    pub report_webhook_url: Option<String>,
}

impl EtlConfig {
    /// Load ETL configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            auto_run_enabled: std::env::var("ETL_AUTO_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            run_interval_minutes: std::env::var("ETL_RUN_INTERVAL_MINUTES")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            extract_timeout_secs: std::env::var("ETL_EXTRACT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            stage_timeout_secs: std::env::var("ETL_STAGE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            lookup_timeout_secs: std::env::var("ETL_LOOKUP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            rejection_threshold: std::env::var("ETL_REJECTION_THRESHOLD")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()
                .unwrap_or(0.5),
            max_retries: std::env::var("ETL_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            retry_delay_secs: std::env::var("ETL_RETRY_DELAY_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            log_retention_days: std::env::var("ETL_LOG_RETENTION_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .unwrap_or(90),
            enrichment_url: std::env::var("ETL_ENRICHMENT_URL").ok(),
            report_webhook_url: std::env::var("ETL_REPORT_WEBHOOK_URL").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auto_run_enabled && self.run_interval_minutes == 0 {
            anyhow::bail!("ETL_RUN_INTERVAL_MINUTES must be greater than 0");
        }
        if self.extract_timeout_secs == 0 {
            anyhow::bail!("ETL_EXTRACT_TIMEOUT_SECS must be greater than 0");
        }
        if self.stage_timeout_secs == 0 {
            anyhow::bail!("ETL_STAGE_TIMEOUT_SECS must be greater than 0");
        }
        if self.lookup_timeout_secs == 0 {
            anyhow::bail!("ETL_LOOKUP_TIMEOUT_SECS must be greater than 0");
        }
        if !(self.rejection_threshold > 0.0 && self.rejection_threshold <= 1.0) {
            anyhow::bail!(
                "ETL_REJECTION_THRESHOLD must be in (0, 1], got: {}",
                self.rejection_threshold
            );
        }
        if self.log_retention_days == 0 {
            anyhow::bail!("ETL_LOG_RETENTION_DAYS must be greater than 0");
        }
        Ok(())
    }

    /// Get extraction timeout as Duration
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    /// Get stage deadline as Duration
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Get enrichment lookup timeout as Duration
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    /// Delay before the given retry attempt (1-based, escalating).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.retry_delay_secs * attempt as u64)
    }

    /// Get scheduler interval as Duration
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_minutes * 60)
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            auto_run_enabled: false,
            run_interval_minutes: 60,
            extract_timeout_secs: 60,
            stage_timeout_secs: 300,
            lookup_timeout_secs: 5,
            rejection_threshold: 0.5,
            max_retries: 3,
            retry_delay_secs: 5,
            log_retention_days: 90,
            enrichment_url: None,
            report_webhook_url: None,
        }
    }
}
