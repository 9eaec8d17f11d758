use flowtest_engine::api::runs::{RunEvent, RUN_ID_HEADER};
use flowtest_engine::config::{CollectionConfig, Config, LoggingConfig, RunConfig, ServerConfig};
use flowtest_engine::server::create_app;
use flowtest_engine::RunOutcome;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tempfile::TempDir;
use tokio::net::TcpListener;

fn test_config(dir: &TempDir) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        collection: CollectionConfig {
            dir: dir.path().to_path_buf(),
        },
        run: RunConfig {
            timeout_ms: 5_000,
            request_failure_tolerance: 0,
        },
        logging: LoggingConfig {
            filter: "warn".to_string(),
        },
    }
}

async fn spawn_app(dir: &TempDir) -> SocketAddr {
    let app = create_app(test_config(dir)).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    addr
}

fn greeting_flow() -> Value {
    json!({
        "nodes": [
            { "id": "set", "type": "setVarNode", "data": { "name": "who", "value": "world" } },
            { "id": "out", "type": "outputNode", "data": "hello ${who}" }
        ],
        "edges": [ { "id": "e1", "source": "set", "target": "out" } ]
    })
}

fn parse_events(body: &str) -> Vec<RunEvent> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_health_check() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_app(&dir).await;

    let body = reqwest::get(format!("http://{}/healthz", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_flow_document_lifecycle() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_app(&dir).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/flows/greeting", addr);

    let created = client.post(&url).send().await.unwrap();
    assert_eq!(created.status(), 201);
    assert!(dir.path().join("greeting.flow").exists());

    let duplicate = client.post(&url).send().await.unwrap();
    assert_eq!(duplicate.status(), 409);

    let placeholder: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(placeholder, json!({}));

    let saved = client.put(&url).json(&greeting_flow()).send().await.unwrap();
    assert_eq!(saved.status(), 200);

    let document: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(document["nodes"][1]["data"], json!("hello ${who}"));

    let listed: Value = client
        .get(format!("http://{}/api/flows", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed, json!({ "flows": ["greeting"] }));

    assert_eq!(client.delete(&url).send().await.unwrap().status(), 200);
    assert_eq!(client.delete(&url).send().await.unwrap().status(), 404);
}

#[tokio::test]
async fn test_run_streams_logs_then_result() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_app(&dir).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/runs", addr))
        .json(&json!({ "flow": greeting_flow() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key(RUN_ID_HEADER));

    let events = parse_events(&response.text().await.unwrap());
    assert_eq!(events.len(), 2);
    match &events[0] {
        RunEvent::Log(entry) => assert_eq!(entry.payload, Some(json!("hello world"))),
        other => panic!("expected a log line, got {:?}", other),
    }
    match &events[1] {
        RunEvent::Result(result) => {
            assert_eq!(result.outcome, RunOutcome::Completed);
            assert_eq!(result.last_node.as_deref(), Some("out"));
        }
        other => panic!("expected the result line, got {:?}", other),
    }
}

#[tokio::test]
async fn test_saved_flow_runs_with_environment() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("environments")).unwrap();
    std::fs::write(dir.path().join("environments/dev.env"), "who=dev\n").unwrap();

    let flow = json!({
        "nodes": [ { "id": "out", "type": "outputNode", "data": "hello ${who}" } ],
        "edges": []
    });
    let addr = spawn_app(&dir).await;
    let client = reqwest::Client::new();
    client
        .post(format!("http://{}/api/flows/env", addr))
        .json(&flow)
        .send()
        .await
        .unwrap();

    let body = client
        .post(format!("http://{}/api/flows/env/run", addr))
        .json(&json!({ "environment": "dev" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let events = parse_events(&body);
    assert!(matches!(&events[0], RunEvent::Log(entry) if entry.payload == Some(json!("hello dev"))));
    assert!(matches!(&events[1], RunEvent::Result(result) if result.is_completed()));
}

#[tokio::test]
async fn test_invalid_flow_reports_failed_run() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_app(&dir).await;

    let body = reqwest::Client::new()
        .post(format!("http://{}/api/runs", addr))
        .json(&json!({ "flow": {} }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let events = parse_events(&body);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[1], RunEvent::Result(result) if result.outcome == RunOutcome::Failed));
}

#[tokio::test]
async fn test_cancel_unknown_run() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_app(&dir).await;

    let response = reqwest::Client::new()
        .post(format!(
            "http://{}/api/runs/{}/cancel",
            addr,
            uuid::Uuid::new_v4()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_invalid_graph_is_not_saved() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_app(&dir).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/flows/broken", addr);

    let duplicate_ids = json!({
        "nodes": [
            { "id": "out", "type": "outputNode", "data": 1 },
            { "id": "out", "type": "outputNode", "data": 2 }
        ],
        "edges": []
    });
    let response = client.put(&url).json(&duplicate_ids).send().await.unwrap();
    assert_eq!(response.status(), 400);
    assert!(!dir.path().join("broken.flow").exists());

    let response = client.post(&url).json(&duplicate_ids).send().await.unwrap();
    assert_eq!(response.status(), 400);
    assert!(!dir.path().join("broken.flow").exists());
}
