/// Graph executor
///
/// Walks a validated `FlowGraph` from its entry node, one node at a time. After each
/// node the single outgoing edge is followed, or for assert nodes the edge labelled
/// with the branch the node selected. The run stops when a node has no outgoing edge,
/// when a node fails, or when cancellation or the deadline is observed.
///
/// Every run ends in exactly one `RunResult`. Node failures, timeouts and registry
/// defects all become data in that result; nothing escapes the executor as a panic or
/// a Rust error.

use crate::error::RunError;
use crate::flow::graph::FlowGraph;
use crate::flow::types::{BranchLabel, Node};
use crate::nodes::{NodeError, NodeRegistry};
use crate::runtime::context::{ExecutionContext, Variables};
use crate::runtime::logger::{GraphLogger, LogEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    TimedOut,
    Failed,
}

/// Final report of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Node the run was positioned at when it stopped; `None` if it never started
    pub last_node: Option<String>,
    pub error: Option<RunError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Variables as they stood when the run stopped
    pub variables: Variables,
}

impl RunResult {
    /// Result for a run that failed before reaching its first node
    pub fn rejected(run_id: Uuid, started_at: DateTime<Utc>, error: RunError) -> Self {
        Self {
            run_id,
            outcome: RunOutcome::Failed,
            last_node: None,
            error: Some(error),
            started_at,
            finished_at: Utc::now(),
            variables: Variables::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Executor tuning
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorConfig {
    /// Number of failed requests a run may absorb before it fails
    pub request_failure_tolerance: u32,
}

/// Drives runs over validated graphs
#[derive(Debug)]
pub struct GraphExecutor {
    registry: Arc<NodeRegistry>,
    config: ExecutorConfig,
}

impl GraphExecutor {
    pub fn new(registry: Arc<NodeRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Execute a graph to completion
    ///
    /// The logger is consumed so the log stream ends together with the run.
    pub async fn execute(
        &self,
        graph: &FlowGraph,
        mut context: ExecutionContext,
        logger: GraphLogger,
    ) -> RunResult {
        let started_at = Utc::now();
        let run_timer = std::time::Instant::now();
        let run_id = context.run_id();
        let tolerance = self.config.request_failure_tolerance;

        let mut current = graph.entry_node();
        let mut tolerated = 0u32;
        let mut step = 0usize;

        tracing::info!(
            "🚀 Starting run {} at node '{}' ({} nodes, timeout {:?})",
            run_id,
            current.id,
            graph.node_count(),
            context.timeout()
        );

        let (outcome, error) = loop {
            // Most handlers never await, so a branch loop must hand control back here
            tokio::task::yield_now().await;
            if let Err(stop) = context.checkpoint() {
                break stop_run(stop, current, &context, &logger);
            }

            step += 1;
            tracing::info!(
                "📍 Step {}: Executing node '{}' (type: {})",
                step,
                current.id,
                current.node_type()
            );

            let handler = match self.registry.get(current.node_type()) {
                Ok(handler) => handler,
                Err(e) => {
                    let error = RunError::from(e);
                    logger.emit(LogEntry::error(error.to_string()).with_node(current));
                    break (RunOutcome::Failed, Some(error));
                }
            };

            let node_timer = std::time::Instant::now();
            let (entry, branch) = match handler.execute(current, &mut context).await {
                Ok(outcome) => {
                    let entry = outcome.summary.map(|summary| {
                        LogEntry::info(summary)
                            .with_node(current)
                            .with_payload(outcome.payload)
                    });
                    (entry, outcome.branch)
                }
                Err(NodeError::RequestFailed(failure)) if tolerated < tolerance => {
                    tolerated += 1;
                    tracing::warn!(
                        "⚠️ Request node '{}' failed, tolerated {}/{}",
                        current.id,
                        tolerated,
                        tolerance
                    );
                    let entry = LogEntry::error(format!(
                        "Request failed ({} of {} tolerated): {}",
                        tolerated, tolerance, failure
                    ))
                    .with_node(current)
                    .with_payload(serde_json::to_value(&failure).ok());
                    (Some(entry), None)
                }
                Err(stop) => break stop_run(stop, current, &context, &logger),
            };
            tracing::debug!("✅ Node '{}' finished in {:?}", current.id, node_timer.elapsed());

            match next_node(graph, current, branch) {
                Ok(next) => {
                    if let Some(entry) = entry {
                        logger.emit(entry);
                    }
                    match next {
                        Some(node) => current = node,
                        None => break (RunOutcome::Completed, None),
                    }
                }
                Err(error) => {
                    // One entry per node: fold the node's own summary into the failure
                    let (message, payload) = match entry {
                        Some(entry) => (format!("{}: {}", entry.message, error), entry.payload),
                        None => (error.to_string(), None),
                    };
                    logger.emit(
                        LogEntry::error(message)
                            .with_node(current)
                            .with_payload(payload),
                    );
                    break (RunOutcome::Failed, Some(error));
                }
            }
        };

        tracing::info!(
            "🏁 Run {} finished as {:?} at node '{}' after {} steps in {:?}",
            run_id,
            outcome,
            current.id,
            step,
            run_timer.elapsed()
        );

        RunResult {
            run_id,
            outcome,
            last_node: Some(current.id.clone()),
            error,
            started_at,
            finished_at: Utc::now(),
            variables: context.into_variables(),
        }
    }
}

/// Pick the node to run after `node`
///
/// `Ok(None)` means the node is terminal. An assert node whose selected branch has no
/// edge is a dead end.
fn next_node<'g>(
    graph: &'g FlowGraph,
    node: &Node,
    branch: Option<bool>,
) -> Result<Option<&'g Node>, RunError> {
    let outgoing = graph.outgoing_edges(&node.id);
    let edge = match branch {
        Some(result) => {
            let label = BranchLabel::from(result);
            let edge = outgoing.into_iter().find(|edge| edge.label == Some(label));
            match edge {
                Some(edge) => Some(edge),
                None => {
                    return Err(RunError::DeadEnd {
                        node: node.id.clone(),
                        label,
                    })
                }
            }
        }
        None => outgoing.into_iter().next(),
    };

    match edge {
        Some(edge) => graph
            .node_by_id(&edge.target)
            .map(Some)
            .ok_or_else(|| RunError::Defect {
                message: format!("edge '{}' points at missing node '{}'", edge.id, edge.target),
            }),
        None => Ok(None),
    }
}

/// Turn a stopping node error into the run's terminal state, logging it once
fn stop_run(
    stop: NodeError,
    node: &Node,
    context: &ExecutionContext,
    logger: &GraphLogger,
) -> (RunOutcome, Option<RunError>) {
    match stop {
        NodeError::Cancelled => {
            logger.emit(LogEntry::info(format!("Run cancelled at node '{}'", node.id)).with_node(node));
            (RunOutcome::Cancelled, None)
        }
        NodeError::TimedOut => {
            let error = RunError::TimedOut {
                timeout_ms: u64::try_from(context.timeout().as_millis()).unwrap_or(u64::MAX),
            };
            logger.emit(LogEntry::error(error.to_string()).with_node(node));
            (RunOutcome::TimedOut, Some(error))
        }
        NodeError::RequestFailed(failure) => {
            let payload = serde_json::to_value(&failure).ok();
            let error = RunError::RequestFailed { failure };
            logger.emit(
                LogEntry::error(error.to_string())
                    .with_node(node)
                    .with_payload(payload),
            );
            (RunOutcome::Failed, Some(error))
        }
        NodeError::InvalidData(message) => {
            let error = RunError::InvalidNodeData { message };
            logger.emit(LogEntry::error(error.to_string()).with_node(node));
            (RunOutcome::Failed, Some(error))
        }
        NodeError::Defect(message) => {
            tracing::error!("💥 Engine defect at node '{}': {}", node.id, message);
            let error = RunError::Defect { message };
            logger.emit(LogEntry::error(error.to_string()).with_node(node));
            (RunOutcome::Failed, Some(error))
        }
    }
}
