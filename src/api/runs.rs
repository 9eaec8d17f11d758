/// Run endpoints
///
/// A run started over HTTP answers with an `application/x-ndjson` body: one
/// `{"type":"log",...}` line per log entry in emission order, then a single
/// `{"type":"result",...}` line once the run has finished. The run id is sent up front
/// in the `x-run-id` header so the client can cancel while the stream is open.

use crate::api::{status_for, AppState};
use crate::flow::environment::load_environment;
use crate::runtime::context::Variables;
use crate::runtime::engine::RunResult;
use crate::runtime::logger::LogEntry;
use crate::runtime::runs::{FlowRun, RunOptions};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

/// Header carrying the id of a streamed run
pub const RUN_ID_HEADER: &str = "x-run-id";

/// Request body for starting a run
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// The `.flow` document to run
    pub flow: Value,
    #[serde(flatten)]
    pub settings: RunSettings,
}

/// Optional per-run overrides
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSettings {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Initial variables; these win over environment values
    #[serde(default)]
    pub variables: Variables,
    /// Name of an environment file in the collection
    #[serde(default)]
    pub environment: Option<String>,
}

/// One line of a run stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    Log(LogEntry),
    Result(RunResult),
}

/// Create run routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/runs", post(start_run).get(list_runs))
        .route("/api/runs/{id}/cancel", post(cancel_run))
}

/// Run a posted flow document
///
/// POST /api/runs
/// Body: { "flow": { "nodes": [...], "edges": [...] }, "timeoutMs": 60000, "variables": {...}, "environment": "dev" }
async fn start_run(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<Response, StatusCode> {
    let options = resolve_options(&state, payload.settings).await?;
    let run = state.runner.run_document(&payload.flow, options);
    tracing::info!("📥 Started run {}", run.id());
    Ok(stream_run(run))
}

/// List active run ids
///
/// GET /api/runs
async fn list_runs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "runs": state.runner.active_runs() }))
}

/// Cancel an active run
///
/// POST /api/runs/{id}/cancel
async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    if state.runner.cancel(id) {
        Ok(Json(json!({ "runId": id, "cancelled": true })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

/// Merge environment, request variables and timeout into run options
pub(crate) async fn resolve_options(
    state: &AppState,
    settings: RunSettings,
) -> Result<RunOptions, StatusCode> {
    let mut variables = match settings.environment.as_deref() {
        Some(name) => load_environment(state.store.root(), name)
            .await
            .map_err(|e| {
                tracing::warn!("❌ Failed to load environment '{}': {}", name, e);
                status_for(&e)
            })?,
        None => Variables::new(),
    };
    variables.extend(settings.variables);

    let timeout = settings
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.run.timeout());

    Ok(RunOptions::default()
        .with_timeout(timeout)
        .with_variables(variables))
}

/// Stream a run's log entries followed by its result as NDJSON
pub(crate) fn stream_run(run: FlowRun) -> Response {
    let run_id = run.id();
    let (logs, completion) = run.into_parts();

    let log_lines = logs.map(|entry| ndjson_line(&RunEvent::Log(entry)));
    let result_line = futures::stream::once(async move {
        ndjson_line(&RunEvent::Result(completion.wait().await))
    });
    let body = Body::from_stream(log_lines.chain(result_line).map(Ok::<_, Infallible>));

    (
        [
            (header::CONTENT_TYPE, "application/x-ndjson".to_string()),
            (HeaderName::from_static(RUN_ID_HEADER), run_id.to_string()),
        ],
        body,
    )
        .into_response()
}

fn ndjson_line(event: &RunEvent) -> String {
    let mut line = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!("❌ Failed to encode run event: {}", e);
        json!({ "type": "error", "message": e.to_string() }).to_string()
    });
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_accepts_minimal_body() {
        let request: RunRequest = serde_json::from_value(json!({ "flow": {} })).unwrap();
        assert_eq!(request.flow, json!({}));
        assert!(request.settings.timeout_ms.is_none());
        assert!(request.settings.variables.is_empty());
    }

    #[test]
    fn test_run_request_settings() {
        let request: RunRequest = serde_json::from_value(json!({
            "flow": { "nodes": [] },
            "timeoutMs": 250,
            "variables": { "host": "localhost" },
            "environment": "dev"
        }))
        .unwrap();
        assert_eq!(request.settings.timeout_ms, Some(250));
        assert_eq!(request.settings.variables.get("host"), Some(&json!("localhost")));
        assert_eq!(request.settings.environment.as_deref(), Some("dev"));
    }

    #[test]
    fn test_ndjson_line_is_tagged_and_terminated() {
        let line = ndjson_line(&RunEvent::Log(LogEntry::info("hello")));
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["message"], "hello");
    }
}
