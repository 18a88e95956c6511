//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod cancel;
pub mod runs;
pub mod sources;
pub mod start;
pub mod status;
pub mod watch;
