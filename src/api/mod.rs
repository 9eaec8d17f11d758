/// HTTP API layer
///
/// This module provides the REST endpoints used by the desktop shell:
/// - Starting runs and streaming their logs as NDJSON
/// - Cancelling runs by id
/// - Reading and writing `.flow` documents in the collection directory

// Run endpoints (start, list, cancel)
pub mod runs;

// Flow document endpoints (GET/PUT/POST/DELETE)
pub mod flows;

use crate::config::RunConfig;
use crate::error::FlowError;
use crate::flow::storage::FlowStore;
use crate::runtime::runs::FlowRunner;
use axum::http::StatusCode;

// Re-export router builders
pub use flows::create_flow_routes;
pub use runs::create_run_routes;

/// Application state containing shared resources
#[derive(Debug, Clone)]
pub struct AppState {
    /// Starts and tracks runs
    pub runner: FlowRunner,
    /// `.flow` files of the collection
    pub store: FlowStore,
    /// Defaults for runs started over HTTP
    pub run: RunConfig,
}

/// HTTP status for a flow-level error
pub fn status_for(err: &FlowError) -> StatusCode {
    match err {
        FlowError::InvalidName(_)
        | FlowError::Serialization(_)
        | FlowError::Json(_)
        | FlowError::GraphInvalid(_) => StatusCode::BAD_REQUEST,
        FlowError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        FlowError::Io(e) if e.kind() == std::io::ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
