//! MDP CLI - Main entry point

use clap::Parser;
use mdp_cli::{Cli, Commands, SourcesCommand};
use mdp_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Handle markdown help generation
    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    // Ensure a command is provided
    if cli.command.is_none() {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    }

    // Initialize logging based on verbose flag and environment
    let log_config = if cli.verbose {
        // Verbose mode: log to console with debug level
        LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::Console)
            .log_file_prefix("mdp-cli".to_string())
            .build()
    } else {
        // Normal mode: only warnings and errors to console
        LogConfig::builder()
            .level(LogLevel::Warn)
            .output(LogOutput::Console)
            .log_file_prefix("mdp-cli".to_string())
            .build()
    };

    // Merge with environment variables (they take precedence)
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    // Initialize logging (ignore errors as CLI should work without logging)
    let _ = init_logging(&log_config);

    // Execute command
    let result = execute_command(&cli).await;

    // Handle result
    if let Err(e) = result {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli) -> mdp_cli::Result<()> {
    // Command is guaranteed to exist at this point (checked in main)
    let Some(ref command) = cli.command else {
        unreachable!("Command should have been validated in main");
    };

    match command {
        Commands::Start {
            scope,
            since,
            validate_only,
            watch,
        } => {
            mdp_cli::commands::start::run(
                scope.clone(),
                since.clone(),
                *validate_only,
                *watch,
                cli.server_url.clone(),
            )
            .await
        }

        Commands::Status { scope } => {
            mdp_cli::commands::status::run(scope.clone(), cli.server_url.clone()).await
        }

        Commands::Runs { scope, limit } => {
            mdp_cli::commands::runs::run(scope.clone(), *limit, cli.server_url.clone()).await
        }

        Commands::Cancel { run_id } => {
            mdp_cli::commands::cancel::run(*run_id, cli.server_url.clone()).await
        }

        Commands::Watch {
            scope,
            interval_secs,
        } => {
            mdp_cli::commands::watch::run(scope.clone(), *interval_secs, cli.server_url.clone())
                .await
        }

        Commands::Sources { command } => match command {
            SourcesCommand::List { all } => {
                mdp_cli::commands::sources::list(*all, cli.server_url.clone()).await
            }
            SourcesCommand::Show { id } => {
                mdp_cli::commands::sources::show(*id, cli.server_url.clone()).await
            }
        },
    }
}
