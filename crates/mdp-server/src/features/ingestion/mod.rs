//! Ingestion run management
//!
//! Vertical slice for triggering, observing and cancelling ingestion
//! runs. Commands go through the [`crate::etl::RunCoordinator`]; queries
//! read the ingestion log directly. The connection between HTTP and the
//! pipeline is intentionally thin: handlers translate between DTOs and
//! the `etl` types and map errors onto the response envelope.

pub mod commands;
pub mod queries;
pub mod routes;
pub mod types;

pub use commands::{
    CancelRunCommand, CancelRunError, CancelRunResponse, StartRunCommand, StartRunError,
    StartRunResponse,
};

pub use queries::{GetStatusError, GetStatusQuery, ListRunsError, ListRunsQuery, ListRunsResponse};

pub use routes::ingestion_routes;
pub use types::RunSnapshot;
