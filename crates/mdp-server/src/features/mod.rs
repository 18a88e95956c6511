//! Feature modules implementing the MDP API
//!
//! Each feature is organized as a vertical slice following the CQRS
//! (Command Query Responsibility Segregation) pattern, with its own
//! commands, queries, and routes.
//!
//! # Features
//!
//! - **ingestion**: Trigger, observe and cancel ingestion runs
//! - **sources**: Read-only source catalogue with live reachability probes
//!
//! # Architecture
//!
//! Each feature module follows the structure:
//! - `commands/` - Write operations (start, cancel)
//! - `queries/` - Read operations (status, history, catalogue)
//! - `routes.rs` - HTTP route definitions
//! - `types.rs` - Shared DTOs (if needed)
//!
//! Commands and queries implement the mediator pattern using the
//! `mediator` crate; HTTP handlers call the same `handle` functions the
//! mediator dispatches to.

pub mod ingestion;
pub mod sources;

use axum::Router;
use std::sync::Arc;

use crate::etl::RunCoordinator;

/// Shared state for all feature routes
///
/// The coordinator carries everything handlers reach for: the source
/// registry, the ingestion log and the extraction adapters.
#[derive(Clone)]
pub struct FeatureState {
    pub coordinator: Arc<RunCoordinator>,
}

/// Creates the main API router with all feature routes mounted
///
/// Each feature is mounted under its own path prefix:
/// - `/ingestion` - Run management
/// - `/sources` - Source catalogue
///
/// # Arguments
///
/// * `state` - Shared state carrying the run coordinator
///
/// # Returns
///
/// An Axum router with all feature routes configured
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .nest(
            "/ingestion",
            ingestion::ingestion_routes().with_state(state.coordinator.clone()),
        )
        .nest(
            "/sources",
            sources::sources_routes().with_state(state.coordinator.clone()),
        )
}
