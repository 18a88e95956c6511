//! ETL configuration parsing tests
//!
//! `EtlConfig::from_env` reads process-wide environment state, so every
//! test here runs `#[serial]` and cleans up the variables it sets.

use mdp_server::etl::EtlConfig;
use serial_test::serial;
use std::env;
use std::time::Duration;

const ETL_VARS: [&str; 11] = [
    "ETL_AUTO_ENABLED",
    "ETL_RUN_INTERVAL_MINUTES",
    "ETL_EXTRACT_TIMEOUT_SECS",
    "ETL_STAGE_TIMEOUT_SECS",
    "ETL_LOOKUP_TIMEOUT_SECS",
    "ETL_REJECTION_THRESHOLD",
    "ETL_MAX_RETRIES",
    "ETL_RETRY_DELAY_SECS",
    "ETL_LOG_RETENTION_DAYS",
    "ETL_ENRICHMENT_URL",
    "ETL_REPORT_WEBHOOK_URL",
];

fn clear_etl_env() {
    for var in ETL_VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_config_defaults_without_any_env() {
    clear_etl_env();

    let config = EtlConfig::from_env().expect("defaults should parse");

    assert!(!config.auto_run_enabled);
    assert_eq!(config.run_interval_minutes, 60);
    assert_eq!(config.stage_timeout_secs, 300);
    assert_eq!(config.rejection_threshold, 0.5);
    assert_eq!(config.max_retries, 3);
    assert_eq!(config.log_retention_days, 90);
    assert!(config.enrichment_url.is_none());
    assert!(config.report_webhook_url.is_none());
}

#[test]
#[serial]
fn test_config_reads_env_overrides() {
    clear_etl_env();
    env::set_var("ETL_AUTO_ENABLED", "true");
    env::set_var("ETL_RUN_INTERVAL_MINUTES", "15");
    env::set_var("ETL_STAGE_TIMEOUT_SECS", "120");
    env::set_var("ETL_REJECTION_THRESHOLD", "0.25");
    env::set_var("ETL_ENRICHMENT_URL", "http://segments.internal:8100");

    let config = EtlConfig::from_env().expect("overrides should parse");

    assert!(config.auto_run_enabled);
    assert_eq!(config.run_interval_minutes, 15);
    assert_eq!(config.run_interval(), Duration::from_secs(900));
    assert_eq!(config.stage_timeout(), Duration::from_secs(120));
    assert_eq!(config.rejection_threshold, 0.25);
    assert_eq!(
        config.enrichment_url.as_deref(),
        Some("http://segments.internal:8100")
    );

    clear_etl_env();
}

#[test]
#[serial]
fn test_config_rejects_threshold_out_of_bounds() {
    clear_etl_env();
    env::set_var("ETL_REJECTION_THRESHOLD", "1.5");

    let result = EtlConfig::from_env();
    assert!(result.is_err());

    clear_etl_env();
}

#[test]
#[serial]
fn test_config_rejects_zero_retention() {
    clear_etl_env();
    env::set_var("ETL_LOG_RETENTION_DAYS", "0");

    let result = EtlConfig::from_env();
    assert!(result.is_err());

    clear_etl_env();
}

#[test]
#[serial]
fn test_config_rejects_scheduler_without_interval() {
    clear_etl_env();
    env::set_var("ETL_AUTO_ENABLED", "true");
    env::set_var("ETL_RUN_INTERVAL_MINUTES", "0");

    let result = EtlConfig::from_env();
    assert!(result.is_err());

    clear_etl_env();
}

#[test]
#[serial]
fn test_config_unparseable_values_fall_back_to_defaults() {
    clear_etl_env();
    env::set_var("ETL_MAX_RETRIES", "lots");
    env::set_var("ETL_STAGE_TIMEOUT_SECS", "an hour");

    let config = EtlConfig::from_env().expect("fallbacks should keep the config parseable");
    assert_eq!(config.max_retries, 3);
    assert_eq!(config.stage_timeout_secs, 300);

    clear_etl_env();
}
