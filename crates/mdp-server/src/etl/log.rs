//! Ingestion log store
//!
//! Authoritative record of every run: current state, counters, the
//! append-only event trail, per-source watermarks and the duplicate
//! groups a run collapsed. The store is also where the one-active-run
//! per-scope guarantee lives: `start` performs an atomic check-and-set,
//! so two callers racing for the same scope cannot both win.
//!
//! `PgIngestionLog` is the production store; `MemoryIngestionLog`
//! backs tests and keeps exactly the same semantics.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::dedupe::DuplicateGroup;
use super::error::{EtlError, EtlResult};
use super::run::{IngestionRun, RunEvent, RunState, RunStats, Stage};

/// What a cancellation request achieved.
#[derive(Debug)]
pub enum CancelOutcome {
    /// The run was non-terminal and is now cancelled.
    Cancelled(IngestionRun),
    /// The run had already finished; nothing changed.
    AlreadyTerminal(IngestionRun),
    /// No run with that id exists.
    NotFound,
}

#[async_trait]
pub trait IngestionLogStore: Send + Sync {
    /// Open a run for the scope, or fail with a concurrency conflict
    /// carrying the active run's start time. Atomic: of two concurrent
    /// callers, exactly one wins.
    async fn start(&self, scope: &str, runner_host: Option<String>) -> EtlResult<IngestionRun>;

    /// Move a run forward. Fails with [`EtlError::Cancelled`] when the
    /// run was cancelled externally, which is how the pipeline observes
    /// cancellation at stage boundaries.
    async fn advance(
        &self,
        run_id: Uuid,
        to: RunState,
        note: Option<String>,
    ) -> EtlResult<IngestionRun>;

    /// Terminal success, recording the run's counters.
    async fn complete(&self, run_id: Uuid, stats: RunStats) -> EtlResult<IngestionRun>;

    /// Terminal failure, recording the failing stage and message.
    async fn fail(&self, run_id: Uuid, stage: Stage, message: &str) -> EtlResult<IngestionRun>;

    /// Request cancellation of a run.
    async fn cancel(&self, run_id: Uuid) -> EtlResult<CancelOutcome>;

    async fn get(&self, run_id: Uuid) -> EtlResult<Option<IngestionRun>>;

    /// Most recently started run, optionally restricted to one scope.
    async fn latest(&self, scope: Option<&str>) -> EtlResult<Option<IngestionRun>>;

    /// Recent runs, newest first.
    async fn history(&self, scope: Option<&str>, limit: i64) -> EtlResult<Vec<IngestionRun>>;

    /// Append-only event trail of one run, oldest first.
    async fn events(&self, run_id: Uuid) -> EtlResult<Vec<RunEvent>>;

    /// Record the duplicate groups a run collapsed.
    async fn record_duplicates(&self, run_id: Uuid, groups: &[DuplicateGroup]) -> EtlResult<()>;

    /// Incremental watermark for a source, if one was ever set.
    async fn watermark(&self, source_id: Uuid) -> EtlResult<Option<DateTime<Utc>>>;

    async fn set_watermark(&self, source_id: Uuid, watermark: DateTime<Utc>) -> EtlResult<()>;

    /// Delete finished runs that started before the cutoff. Returns how
    /// many runs were removed. Non-terminal runs are never touched.
    async fn sweep_expired(&self, older_than: DateTime<Utc>) -> EtlResult<u64>;
}

/// Shared transition policy for both store implementations.
fn ensure_can_advance(run: &IngestionRun, to: RunState) -> EtlResult<()> {
    if run.state == RunState::Cancelled {
        return Err(EtlError::Cancelled);
    }
    if !run.state.can_advance_to(to) {
        return Err(EtlError::Storage(format!(
            "run {} cannot move from {} to {}",
            run.id, run.state, to
        )));
    }
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    scope: String,
    state: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    records_processed: i64,
    records_rejected: i64,
    duplicates_collapsed: i64,
    error_message: Option<String>,
    failed_stage: Option<String>,
    runner_host: Option<String>,
}

impl From<RunRow> for IngestionRun {
    fn from(row: RunRow) -> Self {
        IngestionRun {
            id: row.id,
            scope: row.scope,
            state: RunState::from(row.state),
            started_at: row.started_at,
            finished_at: row.finished_at,
            records_processed: row.records_processed,
            records_rejected: row.records_rejected,
            duplicates_collapsed: row.duplicates_collapsed,
            error_message: row.error_message,
            failed_stage: row.failed_stage,
            runner_host: row.runner_host,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    run_id: Uuid,
    state: String,
    note: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl From<EventRow> for RunEvent {
    fn from(row: EventRow) -> Self {
        RunEvent {
            id: row.id,
            run_id: row.run_id,
            state: RunState::from(row.state),
            note: row.note,
            recorded_at: row.recorded_at,
        }
    }
}

const RUN_COLUMNS: &str = "id, scope, state, started_at, finished_at, records_processed, \
     records_rejected, duplicates_collapsed, error_message, failed_stage, runner_host";

/// Log store backed by the ingestion_runs tables.
#[derive(Debug, Clone)]
pub struct PgIngestionLog {
    pool: PgPool,
}

impl PgIngestionLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock one run row inside a transaction.
    async fn lock_run(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        run_id: Uuid,
    ) -> EtlResult<Option<IngestionRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM ingestion_runs WHERE id = $1 FOR UPDATE"
        );
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(run_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(IngestionRun::from))
    }

    async fn insert_event(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        run_id: Uuid,
        state: RunState,
        note: Option<&str>,
    ) -> EtlResult<()> {
        sqlx::query(
            "INSERT INTO ingestion_run_events (run_id, state, note) VALUES ($1, $2, $3)",
        )
        .bind(run_id)
        .bind(state.as_str())
        .bind(note)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IngestionLogStore for PgIngestionLog {
    async fn start(&self, scope: &str, runner_host: Option<String>) -> EtlResult<IngestionRun> {
        // Either our insert wins against the partial unique index over
        // open runs, or somebody else holds the scope. A run finishing
        // between the two statements just means another attempt.
        for _ in 0..3 {
            let mut tx = self.pool.begin().await?;

            let insert_sql = format!(
                "INSERT INTO ingestion_runs (scope, state, runner_host) \
                 VALUES ($1, 'started', $2) \
                 ON CONFLICT (scope) WHERE state NOT IN ('completed', 'failed', 'cancelled') \
                 DO NOTHING \
                 RETURNING {RUN_COLUMNS}"
            );
            let inserted: Option<RunRow> = sqlx::query_as(&insert_sql)
                .bind(scope)
                .bind(runner_host.as_deref())
                .fetch_optional(&mut *tx)
                .await?;

            if let Some(row) = inserted {
                let run = IngestionRun::from(row);
                Self::insert_event(&mut tx, run.id, RunState::Started, None).await?;
                tx.commit().await?;
                return Ok(run);
            }
            tx.commit().await?;

            let active: Option<DateTime<Utc>> = sqlx::query_scalar(
                "SELECT started_at FROM ingestion_runs \
                 WHERE scope = $1 AND state NOT IN ('completed', 'failed', 'cancelled') \
                 ORDER BY started_at DESC LIMIT 1",
            )
            .bind(scope)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(active_started_at) = active {
                return Err(EtlError::ConcurrencyConflict {
                    scope: scope.to_string(),
                    active_started_at,
                });
            }
        }

        Err(EtlError::Storage(format!(
            "could not open a run for scope '{scope}'"
        )))
    }

    async fn advance(
        &self,
        run_id: Uuid,
        to: RunState,
        note: Option<String>,
    ) -> EtlResult<IngestionRun> {
        let mut tx = self.pool.begin().await?;
        let run = Self::lock_run(&mut tx, run_id)
            .await?
            .ok_or_else(|| EtlError::Storage(format!("run {run_id} not found")))?;
        ensure_can_advance(&run, to)?;

        let sql = format!(
            "UPDATE ingestion_runs SET state = $2 WHERE id = $1 RETURNING {RUN_COLUMNS}"
        );
        let row: RunRow = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(to.as_str())
            .fetch_one(&mut *tx)
            .await?;

        Self::insert_event(&mut tx, run_id, to, note.as_deref()).await?;
        tx.commit().await?;
        Ok(IngestionRun::from(row))
    }

    async fn complete(&self, run_id: Uuid, stats: RunStats) -> EtlResult<IngestionRun> {
        let mut tx = self.pool.begin().await?;
        let run = Self::lock_run(&mut tx, run_id)
            .await?
            .ok_or_else(|| EtlError::Storage(format!("run {run_id} not found")))?;
        ensure_can_advance(&run, RunState::Completed)?;

        let sql = format!(
            "UPDATE ingestion_runs \
             SET state = 'completed', finished_at = now(), \
                 records_processed = $2, records_rejected = $3, duplicates_collapsed = $4 \
             WHERE id = $1 RETURNING {RUN_COLUMNS}"
        );
        let row: RunRow = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(stats.records_processed as i64)
            .bind(stats.records_rejected as i64)
            .bind(stats.duplicates_collapsed as i64)
            .fetch_one(&mut *tx)
            .await?;

        let note = format!(
            "processed={} rejected={} duplicates={}",
            stats.records_processed, stats.records_rejected, stats.duplicates_collapsed
        );
        Self::insert_event(&mut tx, run_id, RunState::Completed, Some(&note)).await?;
        tx.commit().await?;
        Ok(IngestionRun::from(row))
    }

    async fn fail(&self, run_id: Uuid, stage: Stage, message: &str) -> EtlResult<IngestionRun> {
        let mut tx = self.pool.begin().await?;
        let run = Self::lock_run(&mut tx, run_id)
            .await?
            .ok_or_else(|| EtlError::Storage(format!("run {run_id} not found")))?;
        ensure_can_advance(&run, RunState::Failed)?;

        let sql = format!(
            "UPDATE ingestion_runs \
             SET state = 'failed', finished_at = now(), failed_stage = $2, error_message = $3 \
             WHERE id = $1 RETURNING {RUN_COLUMNS}"
        );
        let row: RunRow = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(stage.as_str())
            .bind(message)
            .fetch_one(&mut *tx)
            .await?;

        Self::insert_event(&mut tx, run_id, RunState::Failed, Some(message)).await?;
        tx.commit().await?;
        Ok(IngestionRun::from(row))
    }

    async fn cancel(&self, run_id: Uuid) -> EtlResult<CancelOutcome> {
        let mut tx = self.pool.begin().await?;
        let run = match Self::lock_run(&mut tx, run_id).await? {
            Some(run) => run,
            None => return Ok(CancelOutcome::NotFound),
        };
        if run.state.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(run));
        }

        let sql = format!(
            "UPDATE ingestion_runs SET state = 'cancelled', finished_at = now() \
             WHERE id = $1 RETURNING {RUN_COLUMNS}"
        );
        let row: RunRow = sqlx::query_as(&sql)
            .bind(run_id)
            .fetch_one(&mut *tx)
            .await?;

        Self::insert_event(&mut tx, run_id, RunState::Cancelled, None).await?;
        tx.commit().await?;
        Ok(CancelOutcome::Cancelled(IngestionRun::from(row)))
    }

    async fn get(&self, run_id: Uuid) -> EtlResult<Option<IngestionRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM ingestion_runs WHERE id = $1");
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(IngestionRun::from))
    }

    async fn latest(&self, scope: Option<&str>) -> EtlResult<Option<IngestionRun>> {
        let row: Option<RunRow> = match scope {
            Some(scope) => {
                let sql = format!(
                    "SELECT {RUN_COLUMNS} FROM ingestion_runs \
                     WHERE scope = $1 ORDER BY started_at DESC LIMIT 1"
                );
                sqlx::query_as(&sql)
                    .bind(scope)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {RUN_COLUMNS} FROM ingestion_runs \
                     ORDER BY started_at DESC LIMIT 1"
                );
                sqlx::query_as(&sql).fetch_optional(&self.pool).await?
            }
        };
        Ok(row.map(IngestionRun::from))
    }

    async fn history(&self, scope: Option<&str>, limit: i64) -> EtlResult<Vec<IngestionRun>> {
        let rows: Vec<RunRow> = match scope {
            Some(scope) => {
                let sql = format!(
                    "SELECT {RUN_COLUMNS} FROM ingestion_runs \
                     WHERE scope = $1 ORDER BY started_at DESC LIMIT $2"
                );
                sqlx::query_as(&sql)
                    .bind(scope)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {RUN_COLUMNS} FROM ingestion_runs \
                     ORDER BY started_at DESC LIMIT $1"
                );
                sqlx::query_as(&sql).bind(limit).fetch_all(&self.pool).await?
            }
        };
        Ok(rows.into_iter().map(IngestionRun::from).collect())
    }

    async fn events(&self, run_id: Uuid) -> EtlResult<Vec<RunEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, run_id, state, note, recorded_at \
             FROM ingestion_run_events WHERE run_id = $1 ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunEvent::from).collect())
    }

    async fn record_duplicates(&self, run_id: Uuid, groups: &[DuplicateGroup]) -> EtlResult<()> {
        if groups.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for group in groups {
            sqlx::query(
                "INSERT INTO ingestion_duplicate_groups \
                 (run_id, fingerprint, collapsed, kept_ingested_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(run_id)
            .bind(&group.fingerprint)
            .bind(group.collapsed)
            .bind(group.kept_ingested_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn watermark(&self, source_id: Uuid) -> EtlResult<Option<DateTime<Utc>>> {
        let watermark: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT watermark FROM source_watermarks WHERE source_id = $1",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(watermark)
    }

    async fn set_watermark(&self, source_id: Uuid, watermark: DateTime<Utc>) -> EtlResult<()> {
        sqlx::query(
            "INSERT INTO source_watermarks (source_id, watermark, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (source_id) \
             DO UPDATE SET watermark = EXCLUDED.watermark, updated_at = now()",
        )
        .bind(source_id)
        .bind(watermark)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sweep_expired(&self, older_than: DateTime<Utc>) -> EtlResult<u64> {
        let result = sqlx::query(
            "DELETE FROM ingestion_runs \
             WHERE state IN ('completed', 'failed', 'cancelled') AND started_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Default)]
struct MemoryLogInner {
    runs: HashMap<Uuid, IngestionRun>,
    events: Vec<RunEvent>,
    groups: Vec<(Uuid, DuplicateGroup)>,
    watermarks: HashMap<Uuid, DateTime<Utc>>,
    next_event_id: i64,
}

impl MemoryLogInner {
    fn push_event(&mut self, run_id: Uuid, state: RunState, note: Option<String>) {
        self.next_event_id += 1;
        self.events.push(RunEvent {
            id: self.next_event_id,
            run_id,
            state,
            note,
            recorded_at: Utc::now(),
        });
    }
}

/// In-memory log store with the same semantics as the Postgres one.
#[derive(Debug, Default)]
pub struct MemoryIngestionLog {
    inner: Mutex<MemoryLogInner>,
}

impl MemoryIngestionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IngestionLogStore for MemoryIngestionLog {
    async fn start(&self, scope: &str, runner_host: Option<String>) -> EtlResult<IngestionRun> {
        // Check and insert under one lock, so concurrent starts for the
        // same scope serialize exactly like the database upsert.
        let mut inner = self.inner.lock().await;

        if let Some(active) = inner
            .runs
            .values()
            .find(|r| r.scope == scope && !r.state.is_terminal())
        {
            return Err(EtlError::ConcurrencyConflict {
                scope: scope.to_string(),
                active_started_at: active.started_at,
            });
        }

        let run = IngestionRun {
            id: Uuid::new_v4(),
            scope: scope.to_string(),
            state: RunState::Started,
            started_at: Utc::now(),
            finished_at: None,
            records_processed: 0,
            records_rejected: 0,
            duplicates_collapsed: 0,
            error_message: None,
            failed_stage: None,
            runner_host,
        };
        inner.runs.insert(run.id, run.clone());
        inner.push_event(run.id, RunState::Started, None);
        Ok(run)
    }

    async fn advance(
        &self,
        run_id: Uuid,
        to: RunState,
        note: Option<String>,
    ) -> EtlResult<IngestionRun> {
        let mut inner = self.inner.lock().await;
        let run = inner
            .runs
            .get(&run_id)
            .cloned()
            .ok_or_else(|| EtlError::Storage(format!("run {run_id} not found")))?;
        ensure_can_advance(&run, to)?;

        let updated = {
            let run = inner
                .runs
                .get_mut(&run_id)
                .ok_or_else(|| EtlError::Storage(format!("run {run_id} not found")))?;
            run.state = to;
            run.clone()
        };
        inner.push_event(run_id, to, note);
        Ok(updated)
    }

    async fn complete(&self, run_id: Uuid, stats: RunStats) -> EtlResult<IngestionRun> {
        let mut inner = self.inner.lock().await;
        let run = inner
            .runs
            .get(&run_id)
            .cloned()
            .ok_or_else(|| EtlError::Storage(format!("run {run_id} not found")))?;
        ensure_can_advance(&run, RunState::Completed)?;

        let updated = {
            let run = inner
                .runs
                .get_mut(&run_id)
                .ok_or_else(|| EtlError::Storage(format!("run {run_id} not found")))?;
            run.state = RunState::Completed;
            run.finished_at = Some(Utc::now());
            run.records_processed = stats.records_processed as i64;
            run.records_rejected = stats.records_rejected as i64;
            run.duplicates_collapsed = stats.duplicates_collapsed as i64;
            run.clone()
        };
        let note = format!(
            "processed={} rejected={} duplicates={}",
            stats.records_processed, stats.records_rejected, stats.duplicates_collapsed
        );
        inner.push_event(run_id, RunState::Completed, Some(note));
        Ok(updated)
    }

    async fn fail(&self, run_id: Uuid, stage: Stage, message: &str) -> EtlResult<IngestionRun> {
        let mut inner = self.inner.lock().await;
        let run = inner
            .runs
            .get(&run_id)
            .cloned()
            .ok_or_else(|| EtlError::Storage(format!("run {run_id} not found")))?;
        ensure_can_advance(&run, RunState::Failed)?;

        let updated = {
            let run = inner
                .runs
                .get_mut(&run_id)
                .ok_or_else(|| EtlError::Storage(format!("run {run_id} not found")))?;
            run.state = RunState::Failed;
            run.finished_at = Some(Utc::now());
            run.failed_stage = Some(stage.as_str().to_string());
            run.error_message = Some(message.to_string());
            run.clone()
        };
        inner.push_event(run_id, RunState::Failed, Some(message.to_string()));
        Ok(updated)
    }

    async fn cancel(&self, run_id: Uuid) -> EtlResult<CancelOutcome> {
        let mut inner = self.inner.lock().await;
        let run = match inner.runs.get(&run_id).cloned() {
            Some(run) => run,
            None => return Ok(CancelOutcome::NotFound),
        };
        if run.state.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(run));
        }

        let updated = {
            let run = match inner.runs.get_mut(&run_id) {
                Some(run) => run,
                None => return Ok(CancelOutcome::NotFound),
            };
            run.state = RunState::Cancelled;
            run.finished_at = Some(Utc::now());
            run.clone()
        };
        inner.push_event(run_id, RunState::Cancelled, None);
        Ok(CancelOutcome::Cancelled(updated))
    }

    async fn get(&self, run_id: Uuid) -> EtlResult<Option<IngestionRun>> {
        let inner = self.inner.lock().await;
        Ok(inner.runs.get(&run_id).cloned())
    }

    async fn latest(&self, scope: Option<&str>) -> EtlResult<Option<IngestionRun>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .runs
            .values()
            .filter(|r| scope.map_or(true, |s| r.scope == s))
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn history(&self, scope: Option<&str>, limit: i64) -> EtlResult<Vec<IngestionRun>> {
        let inner = self.inner.lock().await;
        let mut runs: Vec<IngestionRun> = inner
            .runs
            .values()
            .filter(|r| scope.map_or(true, |s| r.scope == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn events(&self, run_id: Uuid) -> EtlResult<Vec<RunEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn record_duplicates(&self, run_id: Uuid, groups: &[DuplicateGroup]) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        for group in groups {
            inner.groups.push((run_id, group.clone()));
        }
        Ok(())
    }

    async fn watermark(&self, source_id: Uuid) -> EtlResult<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;
        Ok(inner.watermarks.get(&source_id).copied())
    }

    async fn set_watermark(&self, source_id: Uuid, watermark: DateTime<Utc>) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.watermarks.insert(source_id, watermark);
        Ok(())
    }

    async fn sweep_expired(&self, older_than: DateTime<Utc>) -> EtlResult<u64> {
        let mut inner = self.inner.lock().await;
        let expired: Vec<Uuid> = inner
            .runs
            .values()
            .filter(|r| r.state.is_terminal() && r.started_at < older_than)
            .map(|r| r.id)
            .collect();
        for id in &expired {
            inner.runs.remove(id);
            inner.events.retain(|e| e.run_id != *id);
            inner.groups.retain(|(run_id, _)| run_id != id);
        }
        Ok(expired.len() as u64)
    }
}
