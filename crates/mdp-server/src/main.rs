//! MDP Server - Main entry point

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mdp_common::logging::{init_logging, LogConfig};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use mdp_server::{
    config::Config,
    error::AppError,
    etl::{
        CompletionNotifier, Enricher, EtlConfig, EtlScheduler, ExtractorSet, HttpLookup,
        LookupService, PgIngestionLog, PgRecordSink, PgSourceRegistry, RunCoordinator,
        WebhookNotifier,
    },
    features, middleware,
};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    db: sqlx::PgPool,
    coordinator: Arc<RunCoordinator>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("mdp-server".to_string())
        .filter_directives("mdp_server=debug,tower_http=debug,axum=trace,sqlx=info".to_string())
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    info!("Starting MDP Server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let etl_config = EtlConfig::from_env()?;

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    // Wire the ETL core against Postgres
    let coordinator = build_coordinator(&db_pool, &etl_config);

    // Start the run scheduler if enabled
    let _scheduler_handle = if etl_config.auto_run_enabled {
        info!(
            "Scheduled ingestion is enabled, running every {} minutes",
            etl_config.run_interval_minutes
        );
        let scheduler = EtlScheduler::new(coordinator.clone(), etl_config.clone());
        Some(scheduler.start())
    } else {
        info!("Scheduled ingestion is disabled (ETL_AUTO_ENABLED=false)");
        None
    };

    // Create application state
    let state = AppState {
        db: db_pool,
        coordinator,
    };

    // Build the application router
    let app = create_router(state, &config);

    // Create socket address
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Assemble the run coordinator with Postgres-backed stores and the
/// full set of extraction adapters.
fn build_coordinator(pool: &sqlx::PgPool, etl_config: &EtlConfig) -> Arc<RunCoordinator> {
    let registry = Arc::new(PgSourceRegistry::new(pool.clone()));
    let log = Arc::new(PgIngestionLog::new(pool.clone()));
    let sink = Arc::new(PgRecordSink::new(pool.clone()));
    let extractors = ExtractorSet::standard(etl_config);

    let lookup = etl_config
        .enrichment_url
        .as_ref()
        .map(|url| Arc::new(HttpLookup::new(url.clone())) as Arc<dyn LookupService>);
    let enricher = Enricher::new(lookup, etl_config.lookup_timeout());

    let notifier = etl_config
        .report_webhook_url
        .as_ref()
        .map(|url| Arc::new(WebhookNotifier::new(url.clone())) as Arc<dyn CompletionNotifier>);

    Arc::new(RunCoordinator::new(
        registry,
        log,
        sink,
        extractors,
        enricher,
        notifier,
        etl_config.clone(),
    ))
}

/// Create the application router with all routes and middleware
fn create_router(state: AppState, config: &Config) -> Router {
    // Create feature state
    let feature_state = features::FeatureState {
        coordinator: state.coordinator.clone(),
    };

    // Feature routes (CQRS architecture)
    let feature_routes = features::router(feature_state);

    // Build the main router with middleware stack
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(state.clone())
        .nest("/api/v1", feature_routes)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Service banner
async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "mdp-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Result<Response, AppError> {
    // Check database connectivity
    sqlx::query("SELECT 1").fetch_one(&state.db).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "database": "connected"
        })),
    )
        .into_response())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give ongoing requests time to complete
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
