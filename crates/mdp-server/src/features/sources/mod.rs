//! Source catalogue (read-only)
//!
//! Operator-facing view of the registry the coordinator resolves run
//! scopes against. The single-source view additionally performs a live
//! probe through the matching extraction adapter.

pub mod queries;
pub mod routes;

pub use queries::{
    GetSourceError, GetSourceQuery, ListSourcesError, ListSourcesQuery, ListSourcesResponse,
    SourceDetail, SourceListItem,
};

pub use routes::sources_routes;
