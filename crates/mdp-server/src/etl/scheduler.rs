//! Scheduled ingestion
//!
//! Optional interval trigger that starts a full-scope run periodically
//! and sweeps expired log rows on the same cadence. Runs directly in a
//! background task; a run already holding the scope makes the tick a
//! quiet skip, never an error.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::EtlConfig;
use super::coordinator::RunCoordinator;
use super::error::EtlError;

/// Interval trigger for automatic full-scope runs.
pub struct EtlScheduler {
    coordinator: Arc<RunCoordinator>,
    config: EtlConfig,
}

impl EtlScheduler {
    pub fn new(coordinator: Arc<RunCoordinator>, config: EtlConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Start the scheduler in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "ETL scheduler started, running every {} minutes",
                self.config.run_interval_minutes
            );

            // Initial delay to let the server come up
            sleep(Duration::from_secs(5)).await;

            let mut ticker = tokio::time::interval(self.config.run_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        })
    }

    /// One scheduler tick: trigger a full-scope run, then sweep logs.
    async fn run_cycle(&self) {
        match self.coordinator.start_run(None, None, None).await {
            Ok(run) => {
                info!(run_id = %run.id, "Scheduled ingestion run started");
            }
            Err(EtlError::ConcurrencyConflict {
                active_started_at, ..
            }) => {
                debug!(
                    %active_started_at,
                    "Skipping scheduled run, another run is active"
                );
            }
            Err(err) => {
                error!(error = %err, "Scheduled ingestion run could not start");
            }
        }

        self.sweep_logs().await;
    }

    async fn sweep_logs(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.log_retention_days as i64);
        match self.coordinator.log().sweep_expired(cutoff).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Swept expired ingestion runs"),
            Err(err) => warn!(error = %err, "Ingestion log retention sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::enrich::Enricher;
    use crate::etl::extract::{Extractor, ExtractorSet, RecordStream};
    use crate::etl::log::{IngestionLogStore, MemoryIngestionLog};
    use crate::etl::record::RawRecord;
    use crate::etl::run::RunState;
    use crate::etl::sink::MemoryRecordSink;
    use crate::etl::source::{MemorySourceRegistry, Source, SourceFormat, SourceType};
    use crate::etl::error::EtlResult;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use uuid::Uuid;

    struct OneRecordExtractor;

    #[async_trait]
    impl Extractor for OneRecordExtractor {
        fn source_type(&self) -> SourceType {
            SourceType::Json
        }

        async fn probe(&self, _source: &Source) -> EtlResult<()> {
            Ok(())
        }

        async fn extract(
            &self,
            source: &Source,
            _since: Option<DateTime<Utc>>,
        ) -> EtlResult<RecordStream> {
            let record = RawRecord::new(
                source.id,
                source.name.clone(),
                json!({ "id": "sku-1", "importe": "5", "fecha": "2024-03-01" }),
            );
            Ok(Box::pin(futures::stream::iter(vec![Ok(record)])))
        }
    }

    fn scheduler_with_log() -> (EtlScheduler, Arc<MemoryIngestionLog>) {
        let config = EtlConfig::default();
        let log = Arc::new(MemoryIngestionLog::new());
        let source = Source {
            id: Uuid::new_v4(),
            name: "crm".to_string(),
            source_type: SourceType::Json,
            connection: json!({ "default_category": "sales" }),
            format: SourceFormat::Json,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let coordinator = Arc::new(RunCoordinator::new(
            Arc::new(MemorySourceRegistry::default().with_source(source)),
            log.clone(),
            Arc::new(MemoryRecordSink::new()),
            ExtractorSet::new().register(Arc::new(OneRecordExtractor)),
            Enricher::new(None, config.lookup_timeout()),
            None,
            config.clone(),
        ));
        (EtlScheduler::new(coordinator, config), log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_triggers_a_full_scope_run() {
        let (scheduler, log) = scheduler_with_log();

        scheduler.run_cycle().await;

        let run = log.latest(None).await.unwrap().unwrap();
        assert_eq!(run.scope, "all");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skips_quietly_when_scope_is_held() {
        let (scheduler, log) = scheduler_with_log();
        log.start("all", None).await.unwrap();

        // Must not panic, must not open a second run.
        scheduler.run_cycle().await;

        let runs = log.history(None, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].state, RunState::Started);
    }
}
