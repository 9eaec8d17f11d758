/// Run manager
///
/// Spawns runs on the tokio runtime and hands the caller a `FlowRun`: the ordered log
/// stream, a cancel handle and the eventual `RunResult`. Active runs are tracked in a
/// lock-free map so a second control path (the cancel endpoint) can stop a run by id.
///
/// The active-run map follows the same ArcSwap pattern as a hot-reload registry: every
/// insert or removal swaps in a fresh map, and readers never block.

use crate::error::{FlowError, RunError};
use crate::flow::graph::{FlowGraph, ValidationError};
use crate::flow::serializer::{FlowSerializer, LoadedFlow};
use crate::flow::types::FlowData;
use crate::nodes::NodeRegistry;
use crate::runtime::context::{ExecutionContext, Variables, DEFAULT_TIMEOUT_MS};
use crate::runtime::engine::{ExecutorConfig, GraphExecutor, RunResult};
use crate::runtime::logger::{GraphLogger, LogEntry, LogStream};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-run parameters
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    /// Initial variables, e.g. from an environment file
    pub variables: Variables,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            variables: Variables::new(),
        }
    }
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }
}

/// Cancellation tokens of the runs currently executing
#[derive(Debug, Default)]
pub struct ActiveRuns {
    runs: ArcSwap<HashMap<Uuid, CancellationToken>>,
}

impl ActiveRuns {
    pub fn insert(&self, run_id: Uuid, token: CancellationToken) {
        self.runs.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(run_id, token.clone());
            next
        });
    }

    pub fn remove(&self, run_id: Uuid) {
        self.runs.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(&run_id);
            next
        });
    }

    /// Request cancellation; false if no such run is active
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.runs.load().get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.runs.load().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.runs.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a run from the active map when its task ends, panics included
struct ActiveGuard {
    active: Arc<ActiveRuns>,
    run_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.remove(self.run_id);
    }
}

/// Handle to a spawned run
#[derive(Debug)]
pub struct FlowRun {
    run_id: Uuid,
    logs: LogStream,
    cancel: CancellationToken,
    completion: RunCompletion,
}

impl FlowRun {
    pub fn id(&self) -> Uuid {
        self.run_id
    }

    /// Ask the run to stop at its next checkpoint
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Split into the log stream and the pending result
    pub fn into_parts(self) -> (LogStream, RunCompletion) {
        (self.logs, self.completion)
    }

    /// Drain every log entry, then wait for the result
    pub async fn collect(self) -> (Vec<LogEntry>, RunResult) {
        let logs: Vec<LogEntry> = self.logs.collect().await;
        let result = self.completion.wait().await;
        (logs, result)
    }

    /// Wait for the result, discarding the log stream
    pub async fn result(self) -> RunResult {
        self.completion.wait().await
    }
}

/// The pending result of a run
#[derive(Debug)]
pub struct RunCompletion {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    handle: JoinHandle<RunResult>,
}

impl RunCompletion {
    pub async fn wait(self) -> RunResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("💥 Run {} task failed: {}", self.run_id, e);
                RunResult::rejected(
                    self.run_id,
                    self.started_at,
                    RunError::Defect {
                        message: format!("run task failed: {}", e),
                    },
                )
            }
        }
    }
}

/// Entry point for starting runs
///
/// Cheap to clone; clones share the executor and the active-run map. All `run_*`
/// methods spawn onto the current tokio runtime.
#[derive(Debug, Clone)]
pub struct FlowRunner {
    serializer: FlowSerializer,
    executor: Arc<GraphExecutor>,
    active: Arc<ActiveRuns>,
}

impl FlowRunner {
    pub fn new(registry: Arc<NodeRegistry>, config: ExecutorConfig) -> Self {
        Self {
            serializer: FlowSerializer::new(registry.clone()),
            executor: Arc::new(GraphExecutor::new(registry, config)),
            active: Arc::new(ActiveRuns::default()),
        }
    }

    pub fn serializer(&self) -> &FlowSerializer {
        &self.serializer
    }

    /// Run a `.flow` document given as text
    pub fn run_text(&self, text: &str, options: RunOptions) -> FlowRun {
        self.run_loaded(self.serializer.from_text(text), options)
    }

    /// Run a parsed `.flow` document
    pub fn run_document(&self, document: &serde_json::Value, options: RunOptions) -> FlowRun {
        self.run_loaded(self.serializer.from_document(document), options)
    }

    /// Run the outcome of loading a flow; load failures become failed runs
    pub fn run_loaded(&self, loaded: crate::error::Result<LoadedFlow>, options: RunOptions) -> FlowRun {
        match loaded {
            Ok(LoadedFlow::Loaded(flow)) => self.run_flow(&flow, options),
            Ok(LoadedFlow::NotLoaded) => {
                self.reject(FlowError::GraphInvalid(ValidationError::Empty).into())
            }
            Err(e) => self.reject(e.into()),
        }
    }

    /// Validate and run flow data
    pub fn run_flow(&self, flow: &FlowData, options: RunOptions) -> FlowRun {
        match FlowGraph::build(flow) {
            Ok(graph) => self.spawn(graph, options),
            Err(e) => {
                tracing::warn!("⚠️ Rejecting invalid flow: {}", e);
                self.reject(FlowError::GraphInvalid(e).into())
            }
        }
    }

    /// Cancel an active run by id
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let cancelled = self.active.cancel(run_id);
        if cancelled {
            tracing::info!("🛑 Cancellation requested for run {}", run_id);
        }
        cancelled
    }

    pub fn active_runs(&self) -> Vec<Uuid> {
        self.active.ids()
    }

    fn spawn(&self, graph: FlowGraph, options: RunOptions) -> FlowRun {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cancel = CancellationToken::new();
        let context = ExecutionContext::new(options.timeout)
            .with_run_id(run_id)
            .with_variables(options.variables)
            .with_cancellation(cancel.clone());
        let (logger, logs) = GraphLogger::channel();

        self.active.insert(run_id, cancel.clone());
        let guard = ActiveGuard {
            active: self.active.clone(),
            run_id,
        };
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            executor.execute(&graph, context, logger).await
        });

        FlowRun {
            run_id,
            logs,
            cancel,
            completion: RunCompletion {
                run_id,
                started_at,
                handle,
            },
        }
    }

    /// A run that failed before its first node: one error entry, then a failed result
    fn reject(&self, error: RunError) -> FlowRun {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let (logger, logs) = GraphLogger::channel();
        logger.emit(LogEntry::error(error.to_string()));
        drop(logger);

        let handle = tokio::spawn(async move { RunResult::rejected(run_id, started_at, error) });
        FlowRun {
            run_id,
            logs,
            cancel: CancellationToken::new(),
            completion: RunCompletion {
                run_id,
                started_at,
                handle,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{DelayData, Edge, Node, NodeData};
    use crate::runtime::engine::RunOutcome;
    use serde_json::json;

    fn runner() -> FlowRunner {
        FlowRunner::new(Arc::new(NodeRegistry::standard()), ExecutorConfig::default())
    }

    fn slow_flow() -> FlowData {
        FlowData {
            nodes: vec![
                Node::new("wait", NodeData::Delay(DelayData { delay: 10_000 })),
                Node::new("done", NodeData::Output(json!("done"))),
            ],
            edges: vec![Edge::new("e1", "wait", "done")],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_id_through_runner() {
        let runner = runner();
        let run = runner.run_flow(&slow_flow(), RunOptions::default());
        let run_id = run.id();
        assert_eq!(runner.active_runs(), vec![run_id]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(runner.cancel(run_id));

        let (logs, result) = run.collect().await;
        assert_eq!(result.outcome, RunOutcome::Cancelled);
        assert_eq!(result.run_id, run_id);
        assert_eq!(logs.len(), 1);
        assert!(runner.active_runs().is_empty());
        assert!(!runner.cancel(run_id));
    }

    #[tokio::test]
    async fn test_sentinel_document_fails_without_running() {
        let (logs, result) = runner().run_text("{}", RunOptions::default()).collect().await;
        assert_eq!(result.outcome, RunOutcome::Failed);
        assert_eq!(result.last_node, None);
        assert!(matches!(result.error, Some(RunError::GraphInvalid { .. })));
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_document_fails_with_serialization_error() {
        let (_, result) = runner().run_text("{ nope", RunOptions::default()).collect().await;
        assert!(matches!(result.error, Some(RunError::Serialization { .. })));
    }

    #[tokio::test]
    async fn test_initial_variables_reach_the_run() {
        let flow = FlowData {
            nodes: vec![Node::new("out", NodeData::Output(json!("${greeting}")))],
            edges: vec![],
        };
        let mut variables = Variables::new();
        variables.insert("greeting".to_string(), json!("hello"));

        let (logs, result) = runner()
            .run_flow(&flow, RunOptions::default().with_variables(variables))
            .collect()
            .await;
        assert!(result.is_completed());
        assert_eq!(logs[0].payload, Some(json!("hello")));
    }

    #[test]
    fn test_active_runs_map() {
        let active = ActiveRuns::default();
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        active.insert(id, token.clone());
        assert_eq!(active.len(), 1);
        assert!(active.cancel(id));
        assert!(token.is_cancelled());
        active.remove(id);
        assert!(active.is_empty());
    }
}
