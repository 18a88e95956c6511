//! MDP CLI Library
//!
//! Command-line interface for operating the MDP ingestion pipeline.
//!
//! # Overview
//!
//! `mdpctl` talks to a running MDP server over its HTTP API:
//!
//! - **Run Management**: Trigger and cancel ingestion runs (`mdpctl start`, `mdpctl cancel`)
//! - **Status Checking**: Inspect the current or most recent run (`mdpctl status`)
//! - **Run History**: List past runs with their counters (`mdpctl runs`)
//! - **Live Following**: Watch a run until it finishes (`mdpctl watch`)
//! - **Source Catalogue**: Inspect configured sources (`mdpctl sources list/show`)

pub mod api;
pub mod commands;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use api::ApiClient;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// MDP - Marketing Data Platform control
#[derive(Parser, Debug)]
#[command(name = "mdpctl")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Generate markdown help documentation
    #[arg(long, hide = true)]
    pub markdown_help: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Server URL
    #[arg(
        long,
        env = "MDP_SERVER_URL",
        default_value = "http://localhost:8200",
        global = true
    )]
    pub server_url: String,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trigger an ingestion run
    Start {
        /// Restrict the run to one source by name
        #[arg(short, long)]
        scope: Option<String>,

        /// Extract records changed since this date (YYYY-MM-DD or RFC 3339),
        /// overriding stored watermarks
        #[arg(long)]
        since: Option<String>,

        /// Validate records without persisting anything
        #[arg(long)]
        validate_only: bool,

        /// Follow the run until it finishes
        #[arg(short, long)]
        watch: bool,
    },

    /// Show the current or most recent run
    Status {
        /// Restrict to one scope
        #[arg(short, long)]
        scope: Option<String>,
    },

    /// List run history, newest first
    Runs {
        /// Restrict to one scope
        #[arg(short, long)]
        scope: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Cancel a running ingestion
    Cancel {
        /// Run id to cancel
        run_id: Uuid,
    },

    /// Follow a run until it reaches a terminal state
    Watch {
        /// Scope whose latest run to follow
        #[arg(short, long)]
        scope: Option<String>,

        /// Seconds between polls
        #[arg(short, long, default_value = "2")]
        interval_secs: u64,
    },

    /// Inspect the source catalogue
    Sources {
        #[command(subcommand)]
        command: SourcesCommand,
    },
}

/// Source catalogue subcommands
#[derive(Subcommand, Debug)]
pub enum SourcesCommand {
    /// List configured sources
    List {
        /// Include inactive sources
        #[arg(short, long)]
        all: bool,
    },

    /// Show one source, including a live reachability probe
    Show {
        /// Source id
        id: Uuid,
    },
}
