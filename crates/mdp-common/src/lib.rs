//! MDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared foundation for the MDP workspace members.
//!
//! # Overview
//!
//! - **Error Handling**: the [`MdpError`] type and `Result` alias
//! - **Logging**: `tracing` subscriber setup shared by server and CLI
//! - **Fingerprints**: SHA-256 content hashes used for record identity
//!
//! # Example
//!
//! ```
//! use mdp_common::fingerprint::fingerprint_parts;
//!
//! let fp = fingerprint_parts(["cust-1042", "2024-11-03"]);
//! assert_eq!(fp.len(), 64);
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;

// Re-export commonly used types
pub use error::{MdpError, Result};
