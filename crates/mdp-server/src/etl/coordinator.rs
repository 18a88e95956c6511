//! Run coordination
//!
//! The coordinator owns the life of an ingestion run: it resolves the
//! requested scope against the registry, opens the run through the log
//! store's atomic scope guard, and executes the stage sequence on a
//! spawned task so the trigger returns as soon as the run is accepted.
//!
//! Stages run strictly in order within a run. Failures are caught here,
//! attributed to the stage they happened in and recorded on the run;
//! nothing already persisted is rolled back, re-ingestion is absorbed by
//! the fingerprint upsert in the sink.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::EtlConfig;
use super::dedupe::Deduplicator;
use super::enrich::Enricher;
use super::error::{EtlError, EtlResult};
use super::extract::{with_retries, ExtractorSet};
use super::log::{CancelOutcome, IngestionLogStore};
use super::record::{CanonicalRecord, EnrichedRecord, RawRecord};
use super::report::CompletionNotifier;
use super::run::{IngestionRun, RunMode, RunState, RunStats, Stage};
use super::sink::RecordSink;
use super::source::{Source, SourceRegistry, SourceScope};
use super::transform::Transformer;
use super::validate::{ValidationOutcome, Validator};

/// Records extracted from one source, kept together so validation can
/// apply that source's rules.
struct SourceBatch {
    source_id: Uuid,
    records: Vec<RawRecord>,
}

/// Orchestrates ingestion runs.
pub struct RunCoordinator {
    registry: Arc<dyn SourceRegistry>,
    log: Arc<dyn IngestionLogStore>,
    sink: Arc<dyn RecordSink>,
    extractors: ExtractorSet,
    validator: Validator,
    transformer: Transformer,
    deduplicator: Deduplicator,
    enricher: Enricher,
    notifier: Option<Arc<dyn CompletionNotifier>>,
    config: EtlConfig,
    /// Cancellation handles of live runs, keyed by run id.
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    runner_host: Option<String>,
}

impl RunCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn SourceRegistry>,
        log: Arc<dyn IngestionLogStore>,
        sink: Arc<dyn RecordSink>,
        extractors: ExtractorSet,
        enricher: Enricher,
        notifier: Option<Arc<dyn CompletionNotifier>>,
        config: EtlConfig,
    ) -> Self {
        Self {
            registry,
            log,
            sink,
            extractors,
            validator: Validator::new(),
            transformer: Transformer::new(),
            deduplicator: Deduplicator::new(),
            enricher,
            notifier,
            config,
            active: Mutex::new(HashMap::new()),
            runner_host: hostname::get().ok().and_then(|h| h.into_string().ok()),
        }
    }

    pub fn log(&self) -> &Arc<dyn IngestionLogStore> {
        &self.log
    }

    pub fn registry(&self) -> &Arc<dyn SourceRegistry> {
        &self.registry
    }

    pub fn extractors(&self) -> &ExtractorSet {
        &self.extractors
    }

    /// Accept and launch an ingestion run.
    ///
    /// Resolves the scope, applies the one-active-run-per-scope guard and
    /// spawns the pipeline on its own task. Returns the accepted run
    /// snapshot (state `started`) immediately; progress is observable
    /// through the log store.
    #[tracing::instrument(skip(self, since))]
    pub async fn start_run(
        self: &Arc<Self>,
        scope: Option<&str>,
        since: Option<DateTime<Utc>>,
        stage: Option<&str>,
    ) -> EtlResult<IngestionRun> {
        let mode = RunMode::parse(stage)?;
        let scope = SourceScope::parse(scope);
        let sources = self.registry.resolve_scope(&scope).await?;

        let run = self
            .log
            .start(scope.as_str(), self.runner_host.clone())
            .await?;
        info!(
            run_id = %run.id,
            scope = %scope,
            sources = sources.len(),
            ?mode,
            "Ingestion run accepted"
        );

        let cancel = CancellationToken::new();
        self.active.lock().await.insert(run.id, cancel.clone());

        let coordinator = Arc::clone(self);
        let run_id = run.id;
        tokio::spawn(async move {
            coordinator
                .execute_run(run_id, sources, mode, since, cancel)
                .await;
        });

        Ok(run)
    }

    /// Request cancellation of a run. The pipeline observes the signal at
    /// its next suspension point; records already persisted stay.
    pub async fn cancel_run(&self, run_id: Uuid) -> EtlResult<CancelOutcome> {
        let outcome = self.log.cancel(run_id).await?;
        if matches!(outcome, CancelOutcome::Cancelled(_)) {
            if let Some(token) = self.active.lock().await.get(&run_id) {
                token.cancel();
            }
            info!(run_id = %run_id, "Cancellation requested");
        }
        Ok(outcome)
    }

    /// Most recent run for the scope, for the status API.
    pub async fn status(&self, scope: Option<&str>) -> EtlResult<Option<IngestionRun>> {
        self.log.latest(scope).await
    }

    async fn execute_run(
        self: Arc<Self>,
        run_id: Uuid,
        sources: Vec<Source>,
        mode: RunMode,
        since: Option<DateTime<Utc>>,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let result = self
            .run_pipeline(run_id, &sources, mode, since, &cancel)
            .await;

        match result {
            Ok(run) => {
                info!(
                    run_id = %run_id,
                    scope = %run.scope,
                    processed = run.records_processed,
                    rejected = run.records_rejected,
                    duplicates = run.duplicates_collapsed,
                    elapsed = ?started.elapsed(),
                    "Ingestion run completed"
                );
                if mode == RunMode::Full {
                    if let Some(notifier) = &self.notifier {
                        notifier.notify(&run).await;
                    }
                }
            }
            Err((_, EtlError::Cancelled)) => {
                info!(run_id = %run_id, "Ingestion run cancelled");
            }
            Err((stage, err)) => {
                error!(
                    run_id = %run_id,
                    stage = stage.as_str(),
                    error = %err,
                    "Ingestion run failed"
                );
                match self.log.fail(run_id, stage, &err.to_string()).await {
                    Ok(_) => {}
                    // The run was cancelled while we were failing it; the
                    // cancelled state stands.
                    Err(EtlError::Cancelled) => {
                        info!(run_id = %run_id, "Run cancelled before failure was recorded");
                    }
                    Err(log_err) => {
                        error!(
                            run_id = %run_id,
                            error = %log_err,
                            "Could not record run failure"
                        );
                    }
                }
            }
        }

        self.active.lock().await.remove(&run_id);
    }

    /// The stage sequence. Errors carry the stage they belong to so the
    /// caller can attribute the failure.
    async fn run_pipeline(
        &self,
        run_id: Uuid,
        sources: &[Source],
        mode: RunMode,
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<IngestionRun, (Stage, EtlError)> {
        let sources_by_id: HashMap<Uuid, &Source> =
            sources.iter().map(|s| (s.id, s)).collect();

        // Extract. The run stays in `started` while sources are read.
        let batches = self
            .bounded(Stage::Extract, self.extract_all(sources, since, cancel))
            .await
            .map_err(|e| (Stage::Extract, e))?;
        let extracted: usize = batches.iter().map(|b| b.records.len()).sum();

        // Watermark candidates have to be taken before validation consumes
        // the batches: the newest ingestion timestamp per source, or the
        // explicit baseline for sources that delivered nothing.
        let mut watermarks: Vec<(Uuid, DateTime<Utc>)> = Vec::new();
        for batch in &batches {
            let candidate = batch.records.iter().map(|r| r.ingested_at).max().or(since);
            if let Some(ts) = candidate {
                watermarks.push((batch.source_id, ts));
            }
        }

        // Validate.
        self.log
            .advance(
                run_id,
                RunState::Validating,
                Some(format!(
                    "{} records extracted from {} sources",
                    extracted,
                    sources.len()
                )),
            )
            .await
            .map_err(|e| (Stage::Validate, e))?;

        let outcome = self
            .validate_all(batches, &sources_by_id)
            .map_err(|e| (Stage::Validate, e))?;
        if outcome.exceeds(self.config.rejection_threshold) {
            return Err((
                Stage::Validate,
                EtlError::DataQualityAbort {
                    rejected: outcome.rejected.len() as u64,
                    total: outcome.total() as u64,
                    threshold: self.config.rejection_threshold,
                },
            ));
        }

        if mode == RunMode::ValidateOnly {
            let stats = RunStats {
                records_processed: 0,
                records_rejected: outcome.rejected.len() as u64,
                duplicates_collapsed: 0,
            };
            let run = self
                .log
                .complete(run_id, stats)
                .await
                .map_err(|e| (Stage::Validate, e))?;
            debug!(
                run_id = %run_id,
                accepted = outcome.accepted.len(),
                rejected = outcome.rejected.len(),
                "Validate-only run finished without writing records"
            );
            return Ok(run);
        }

        // Transform.
        self.log
            .advance(
                run_id,
                RunState::Transforming,
                Some(format!(
                    "{} accepted, {} rejected",
                    outcome.accepted.len(),
                    outcome.rejected.len()
                )),
            )
            .await
            .map_err(|e| (Stage::Transform, e))?;

        let mut canonical = Vec::with_capacity(outcome.accepted.len());
        for record in &outcome.accepted {
            let source = sources_by_id.get(&record.source_id).ok_or_else(|| {
                (
                    Stage::Transform,
                    EtlError::Storage(format!(
                        "record references source {} outside the run scope",
                        record.source_id
                    )),
                )
            })?;
            let mapped = self
                .transformer
                .transform(source, record)
                .map_err(|e| (Stage::Transform, e))?;
            canonical.push(mapped);
        }

        // Enrich.
        self.log
            .advance(run_id, RunState::Enriching, None)
            .await
            .map_err(|e| (Stage::Enrich, e))?;
        let enriched = self
            .bounded(Stage::Enrich, self.enrich_all(canonical, cancel))
            .await
            .map_err(|e| (Stage::Enrich, e))?;

        // Deduplicate.
        self.log
            .advance(run_id, RunState::Deduplicating, None)
            .await
            .map_err(|e| (Stage::Dedupe, e))?;
        let deduped = self.deduplicator.dedupe(enriched);
        if !deduped.groups.is_empty() {
            info!(
                run_id = %run_id,
                groups = deduped.groups.len(),
                collapsed = deduped.collapsed_total(),
                "Collapsed duplicate records"
            );
            self.log
                .record_duplicates(run_id, &deduped.groups)
                .await
                .map_err(|e| (Stage::Dedupe, e))?;
        }

        // Persist.
        let stats = RunStats {
            records_processed: deduped.records.len() as u64,
            records_rejected: outcome.rejected.len() as u64,
            duplicates_collapsed: deduped.collapsed_total(),
        };
        let written = self
            .bounded(Stage::Persist, async {
                self.sink.persist(run_id, &deduped.records).await
            })
            .await
            .map_err(|e| (Stage::Persist, e))?;
        debug!(run_id = %run_id, written, "Records persisted");

        let run = self
            .log
            .complete(run_id, stats)
            .await
            .map_err(|e| (Stage::Persist, e))?;

        // Watermarks only move on success, and failing to store one is not
        // worth failing a run that already completed.
        for (source_id, ts) in watermarks {
            if let Err(err) = self.log.set_watermark(source_id, ts).await {
                warn!(
                    run_id = %run_id,
                    source_id = %source_id,
                    error = %err,
                    "Could not store extraction watermark"
                );
            }
        }

        Ok(run)
    }

    async fn extract_all(
        &self,
        sources: &[Source],
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> EtlResult<Vec<SourceBatch>> {
        let mut batches = Vec::with_capacity(sources.len());
        for source in sources {
            if cancel.is_cancelled() {
                return Err(EtlError::Cancelled);
            }
            let records = self.extract_source(source, since, cancel).await?;
            batches.push(SourceBatch {
                source_id: source.id,
                records,
            });
        }
        Ok(batches)
    }

    async fn extract_source(
        &self,
        source: &Source,
        since_override: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> EtlResult<Vec<RawRecord>> {
        let extractor = self.extractors.get(source.source_type).ok_or_else(|| {
            EtlError::format(format!(
                "no extraction adapter registered for source type '{}'",
                source.source_type
            ))
        })?;

        let label = format!("probe of source '{}'", source.name);
        with_retries(&self.config, &label, || extractor.probe(source)).await?;

        // An explicit baseline on the trigger overrides the stored
        // watermark for this run.
        let since = match since_override {
            Some(since) => Some(since),
            None => self.log.watermark(source.id).await?,
        };

        let mut records = Vec::new();
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 1u32;
        loop {
            let label = format!("extraction from source '{}'", source.name);
            let mut stream =
                with_retries(&self.config, &label, || extractor.extract(source, since)).await?;

            let failure = loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => return Err(EtlError::Cancelled),
                    item = stream.next() => item,
                };
                match item {
                    Some(Ok(record)) => records.push(record),
                    Some(Err(err)) => break Some(err),
                    None => break None,
                }
            };

            match failure {
                None => break,
                // A mid-read connection drop keeps what was read; the
                // re-read appends and fingerprint dedup absorbs the overlap.
                Some(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        "Source '{}' dropped mid-read with {} records kept (attempt {}/{}): {}. Retrying in {}s...",
                        source.name,
                        records.len(),
                        attempt,
                        attempts,
                        err,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Some(err) => return Err(err),
            }
        }

        debug!(
            source = %source.name,
            records = records.len(),
            "Source extraction finished"
        );
        Ok(records)
    }

    fn validate_all(
        &self,
        batches: Vec<SourceBatch>,
        sources_by_id: &HashMap<Uuid, &Source>,
    ) -> EtlResult<ValidationOutcome> {
        let mut merged = ValidationOutcome::default();
        for batch in batches {
            let source = sources_by_id.get(&batch.source_id).ok_or_else(|| {
                EtlError::Storage(format!(
                    "batch references source {} outside the run scope",
                    batch.source_id
                ))
            })?;
            let rules = self.validator.rules_for(source);
            let outcome = self.validator.validate(batch.records, &rules);
            for rejected in &outcome.rejected {
                warn!(
                    source = %source.name,
                    content_hash = %rejected.content_hash,
                    code = rejected.reason.code(),
                    "Record rejected: {}",
                    rejected.detail
                );
            }
            merged.accepted.extend(outcome.accepted);
            merged.rejected.extend(outcome.rejected);
        }
        Ok(merged)
    }

    async fn enrich_all(
        &self,
        records: Vec<CanonicalRecord>,
        cancel: &CancellationToken,
    ) -> EtlResult<Vec<EnrichedRecord>> {
        let mut enriched = Vec::with_capacity(records.len());
        for record in records {
            if cancel.is_cancelled() {
                return Err(EtlError::Cancelled);
            }
            enriched.push(self.enricher.enrich(record).await);
        }
        let fallbacks = enriched
            .iter()
            .filter(|r| r.lookup_warning.is_some())
            .count();
        if fallbacks > 0 {
            warn!(
                records = fallbacks,
                "Segment lookup unavailable, records kept unenriched"
            );
        }
        Ok(enriched)
    }

    /// Apply the stage deadline to the suspending stages.
    async fn bounded<T>(
        &self,
        stage: Stage,
        work: impl Future<Output = EtlResult<T>>,
    ) -> EtlResult<T> {
        let limit = self.config.stage_timeout();
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(EtlError::Timeout {
                stage: stage.as_str().to_string(),
                seconds: limit.as_secs(),
            }),
        }
    }
}
