//! Error types for the MDP CLI
//!
//! Every error here is user-facing: the message says what went wrong and
//! what to try next.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Errors a CLI invocation can surface.
#[derive(Error, Debug)]
pub enum CliError {
    /// The server answered with an error envelope
    #[error("Server error: {0}. Ensure the MDP server is running and MDP_SERVER_URL points at it.")]
    Api(String),

    /// HTTP request failed before an answer arrived
    #[error("Network request failed: {0}. Check your connection and the server URL.")]
    Http(#[from] reqwest::Error),

    /// A command-line argument did not parse or is out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A response body could not be decoded
    #[error("Failed to parse server response: {0}. The server may be a different version than this CLI.")]
    JsonParse(#[from] serde_json::Error),

    /// A watched run ended in a state other than completed
    #[error("Run finished as '{0}'")]
    RunNotCompleted(String),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create an API error
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
