/// Server setup and initialization
///
/// Wires together all components: node registry, run manager, flow store and HTTP
/// routes. Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_flow_routes, create_run_routes, AppState},
    config::{Config, LoggingConfig},
    flow::{serializer::FlowSerializer, storage::FlowStore},
    nodes::NodeRegistry,
    runtime::runs::FlowRunner,
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber
///
/// Output goes to stderr so that `run` can keep stdout for NDJSON.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Build the run manager and flow store for a configuration
pub fn build_state(config: &Config, registry: Arc<NodeRegistry>) -> AppState {
    let runner = FlowRunner::new(registry.clone(), config.run.executor_config());
    let store = FlowStore::new(config.collection.dir.clone(), FlowSerializer::new(registry));
    AppState {
        runner,
        store,
        run: config.run.clone(),
    }
}

/// Create the main Axum application with all routes
pub async fn create_app(config: Config) -> Result<Router> {
    create_app_with_registry(config, Arc::new(NodeRegistry::standard())).await
}

/// Create the application around a custom node registry
pub async fn create_app_with_registry(config: Config, registry: Arc<NodeRegistry>) -> Result<Router> {
    // Ensure collection directory exists
    tracing::info!("📁 Ensuring collection directory exists: {}", config.collection.dir.display());
    tokio::fs::create_dir_all(&config.collection.dir)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create collection directory: {}", e))?;

    tracing::info!("🧩 Node registry ready: {:?}", registry);
    let state = build_state(&config, registry);

    // Create the main application router
    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Run streaming and cancellation
        .merge(create_run_routes())
        // Flow document management
        .merge(create_flow_routes())
        .with_state(state);

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing::info!("Starting flowtest engine server...");

    // Create the application
    let app = create_app(config.clone()).await?;

    // Bind to the configured address
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    // Start the server
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
