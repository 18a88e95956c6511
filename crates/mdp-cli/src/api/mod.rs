//! API client module
//!
//! Re-exports the HTTP client and typed request/response structures.

pub mod client;
pub mod endpoints;
pub mod types;

pub use client::ApiClient;
