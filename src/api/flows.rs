/// Flow document endpoints
///
/// CRUD over `<collection>/<name>.flow`. Documents travel in their persisted JSON form,
/// so the body of a GET can be PUT back unchanged.

use crate::api::runs::{resolve_options, stream_run, RunSettings};
use crate::api::{status_for, AppState};
use crate::error::FlowError;
use crate::flow::graph::FlowGraph;
use crate::flow::serializer::LoadedFlow;
use crate::flow::types::FlowData;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

/// Create flow document routes
pub fn create_flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows", get(list_flows))
        .route(
            "/api/flows/{name}",
            get(get_flow)
                .post(create_flow)
                .put(save_flow)
                .delete(delete_flow),
        )
        .route("/api/flows/{name}/run", post(run_saved_flow))
}

fn log_failure(action: &str, name: &str, err: &FlowError) -> StatusCode {
    let status = status_for(err);
    if status.is_server_error() {
        tracing::error!("❌ Failed to {} flow '{}': {}", action, name, err);
    } else {
        tracing::warn!("⚠️ Could not {} flow '{}': {}", action, name, err);
    }
    status
}

/// Only graphs the executor would accept are persisted
fn validate_flow(name: &str, flow: &FlowData) -> Result<(), StatusCode> {
    FlowGraph::build(flow)
        .map(|_| ())
        .map_err(|e| log_failure("validate", name, &FlowError::GraphInvalid(e)))
}

/// Parse an optional JSON body; blank means "no body"
fn parse_optional_body(body: &str) -> Result<Option<Value>, StatusCode> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|_| StatusCode::BAD_REQUEST)
}

/// List flow names
///
/// GET /api/flows
/// Returns: { "flows": ["checkout", "login"] }
async fn list_flows(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.store.list_flows().await {
        Ok(flows) => Ok(Json(json!({ "flows": flows }))),
        Err(e) => Err(log_failure("list", "*", &e)),
    }
}

/// Read a flow document
///
/// GET /api/flows/{name}
/// Returns the persisted document, `{}` for a flow that has no content yet
async fn get_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let loaded = state
        .store
        .read_flow(&name)
        .await
        .map_err(|e| log_failure("read", &name, &e))?;
    let document = state
        .store
        .serializer()
        .to_document(&loaded)
        .map_err(|e| log_failure("encode", &name, &e))?;
    Ok(Json(document))
}

/// Create a flow, optionally with content
///
/// POST /api/flows/{name}
/// Body: optional flow document; an empty body creates the `{}` placeholder
async fn create_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let flow = match parse_optional_body(&body)? {
        Some(document) => state
            .store
            .serializer()
            .from_document(&document)
            .map_err(|e| log_failure("parse", &name, &e))?
            .into_flow(),
        None => None,
    };
    if let Some(flow) = &flow {
        validate_flow(&name, flow)?;
    }

    state
        .store
        .create_flow(&name, flow.as_ref())
        .await
        .map_err(|e| log_failure("create", &name, &e))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "name": name, "message": format!("Flow '{}' created successfully", name) })),
    ))
}

/// Replace a flow's contents
///
/// PUT /api/flows/{name}
/// Body: { "nodes": [...], "edges": [...] }
async fn save_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(document): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let loaded = state
        .store
        .serializer()
        .from_document(&document)
        .map_err(|e| log_failure("parse", &name, &e))?;
    let LoadedFlow::Loaded(flow) = loaded else {
        return Err(StatusCode::BAD_REQUEST);
    };
    validate_flow(&name, &flow)?;

    state
        .store
        .update_flow(&name, &flow)
        .await
        .map_err(|e| log_failure("save", &name, &e))?;

    Ok(Json(json!({ "name": name, "message": format!("Flow '{}' saved successfully", name) })))
}

/// Delete a flow
///
/// DELETE /api/flows/{name}
async fn delete_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.store.delete_flow(&name).await {
        Ok(true) => Ok(Json(json!({ "message": "Flow deleted successfully" }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(log_failure("delete", &name, &e)),
    }
}

/// Run a saved flow and stream its logs
///
/// POST /api/flows/{name}/run
/// Body: optional { "timeoutMs": ..., "variables": {...}, "environment": "dev" }
async fn run_saved_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<Response, StatusCode> {
    let settings: RunSettings = match parse_optional_body(&body)? {
        Some(value) => serde_json::from_value(value).map_err(|_| StatusCode::BAD_REQUEST)?,
        None => RunSettings::default(),
    };

    // Missing files are a client error; unreadable content becomes a failed run
    let loaded = match state.store.read_flow(&name).await {
        Err(e @ (FlowError::Io(_) | FlowError::InvalidName(_))) => {
            return Err(log_failure("read", &name, &e))
        }
        other => other,
    };

    let options = resolve_options(&state, settings).await?;
    let run = state.runner.run_loaded(loaded, options);
    tracing::info!("📥 Started run {} for flow '{}'", run.id(), name);
    Ok(stream_run(run))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_flow_rejects_invalid_graphs() {
        use crate::flow::types::{Edge, Node, NodeData};

        let valid = FlowData {
            nodes: vec![Node::new("out", NodeData::Output(json!("ok")))],
            edges: vec![],
        };
        assert_eq!(validate_flow("ok", &valid), Ok(()));

        let duplicate_ids = FlowData {
            nodes: vec![
                Node::new("out", NodeData::Output(json!(1))),
                Node::new("out", NodeData::Output(json!(2))),
            ],
            edges: vec![],
        };
        assert_eq!(validate_flow("dup", &duplicate_ids), Err(StatusCode::BAD_REQUEST));

        let two_entries = FlowData {
            nodes: vec![
                Node::new("a", NodeData::Output(json!(1))),
                Node::new("b", NodeData::Output(json!(2))),
                Node::new("c", NodeData::Output(json!(3))),
            ],
            edges: vec![Edge::new("e1", "a", "c")],
        };
        assert_eq!(validate_flow("split", &two_entries), Err(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_parse_optional_body() {
        assert_eq!(parse_optional_body("  "), Ok(None));
        assert_eq!(parse_optional_body("{\"a\":1}"), Ok(Some(json!({ "a": 1 }))));
        assert_eq!(parse_optional_body("{"), Err(StatusCode::BAD_REQUEST));
    }
}
