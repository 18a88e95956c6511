//! ETL orchestration core
//!
//! Multi-stage ingestion of marketing data feeds: extract raw records
//! from configured sources, validate them against per-source rules,
//! normalize into the canonical schema, enrich, deduplicate and persist.
//!
//! # Architecture
//!
//! - **config**: Pipeline knobs (ETL_* environment variables)
//! - **error**: The `EtlError` taxonomy every stage reports through
//! - **source**: Source catalogue and scope resolution (SourceRegistry)
//! - **record**: Record shapes as they move through the stages
//! - **extract**: Per-source-type adapters (HTTP/JSON, CSV, XML, database, FTP)
//! - **validate**: Declarative per-source rules, accept/reject partitioning
//! - **transform**: Normalization into the canonical marketing schema
//! - **enrich**: Derived fields plus the external segment lookup
//! - **dedupe**: Fingerprint-based duplicate collapsing
//! - **run**: Run lifecycle state machine and counters
//! - **log**: Durable ingestion log with the scope concurrency guard
//! - **sink**: Idempotent record persistence (fingerprint upsert)
//! - **coordinator**: Stage sequencing, failure attribution, cancellation
//! - **report**: Best-effort completion webhook
//! - **scheduler**: Optional interval trigger and log retention sweep
//!
//! The HTTP surface for triggering and inspecting runs lives in
//! `features::ingestion`; sources are browsed through `features::sources`.

pub mod config;
pub mod coordinator;
pub mod dedupe;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod log;
pub mod record;
pub mod report;
pub mod run;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod transform;
pub mod validate;

pub use config::EtlConfig;
pub use coordinator::RunCoordinator;
pub use dedupe::{DedupOutcome, Deduplicator, DuplicateGroup};
pub use enrich::{Enricher, HttpLookup, LookupService};
pub use error::{EtlError, EtlResult};
pub use extract::{Extractor, ExtractorSet, RecordStream};
pub use log::{CancelOutcome, IngestionLogStore, MemoryIngestionLog, PgIngestionLog};
pub use record::{CanonicalRecord, EnrichedRecord, RawRecord};
pub use report::{CompletionNotifier, RunReport, WebhookNotifier};
pub use run::{IngestionRun, RunEvent, RunMode, RunState, RunStats, Stage};
pub use scheduler::EtlScheduler;
pub use sink::{MemoryRecordSink, PgRecordSink, RecordSink};
pub use source::{
    MemorySourceRegistry, PgSourceRegistry, Source, SourceFormat, SourceRegistry, SourceScope,
    SourceType,
};
pub use transform::Transformer;
pub use validate::{FieldKind, FieldRule, RejectReason, ValidationOutcome, Validator};
