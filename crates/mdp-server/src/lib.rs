//! MDP Server Library
//!
//! ETL orchestration service for the Marketing Data Platform.
//!
//! # Overview
//!
//! The MDP server ingests marketing data from heterogeneous upstream
//! systems (CRM exports, commerce APIs, partner FTP drops, external
//! databases) into one normalized record store:
//!
//! - **ETL Pipeline**: extract, validate, transform, enrich, deduplicate
//!   and persist, coordinated per run with a durable ingestion log
//! - **API Endpoints**: trigger, observe and cancel runs; browse the
//!   source catalogue
//! - **Database Management**: PostgreSQL integration with SQLx
//! - **Configuration**: Environment-based configuration management
//! - **Middleware**: CORS and request logging
//!
//! # Architecture
//!
//! The HTTP surface follows a **CQRS (Command Query Responsibility
//! Segregation)** layout: each feature is a vertical slice with its own
//! commands, queries and routes, all delegating to the [`etl`] core.
//!
//! - **Commands** (Write Operations): start a run, cancel a run
//! - **Queries** (Read Operations): run status, run history, source
//!   catalogue
//!
//! The pipeline itself lives in [`etl`]: the
//! [`etl::RunCoordinator`] owns the stage sequence, the
//! [`etl::IngestionLogStore`] is the authoritative run log and the
//! one-active-run-per-scope guard, and extraction adapters behind
//! [`etl::Extractor`] speak to the upstream systems.
//!
//! ## Framework Stack
//!
//! - **Axum**: HTTP routing and extraction
//! - **SQLx**: PostgreSQL access for the log, sink and registry
//! - **Tokio**: task-per-run execution, timeouts and cancellation
//!
//! # Example
//!
//! ```no_run
//! use mdp_server::etl::{EtlConfig, ExtractorSet};
//!
//! let config = EtlConfig::default();
//! let extractors = ExtractorSet::standard(&config);
//! ```

pub mod api;
pub mod config;
pub mod cqrs;
pub mod error;
pub mod etl;
pub mod features;
pub mod middleware;

// Re-export commonly used types
pub use error::{AppError, ServerResult};
