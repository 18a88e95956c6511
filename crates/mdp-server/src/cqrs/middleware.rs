//! Marker traits classifying mediator requests.
//!
//! Every request registered with the mediator is tagged as either a
//! [`Command`] (state-changing) or a [`Query`] (read-only). The tags are
//! compile-time documentation of each slice's write/read split.

/// Marker for state-changing requests.
pub trait Command {}

/// Marker for read-only requests.
pub trait Query {}
