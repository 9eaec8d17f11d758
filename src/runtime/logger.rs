/// Run logger
///
/// Each run owns one `GraphLogger`. Entries are pushed into an unbounded channel in
/// emission order and mirrored to `tracing`; the receiving half is handed to whoever
/// started the run. Sending never blocks the executor, and a dropped receiver only
/// means nobody is listening.

use crate::flow::types::{Node, NodeType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// The node a log entry is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
}

impl From<&Node> for NodeRef {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            node_type: node.node_type(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            node: None,
            payload: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn with_node(mut self, node: &Node) -> Self {
        self.node = Some(NodeRef::from(node));
        self
    }

    pub fn with_payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }
}

/// Ordered stream of a run's log entries; ends when the run finishes
pub type LogStream = UnboundedReceiverStream<LogEntry>;

#[derive(Debug, Clone)]
pub struct GraphLogger {
    tx: mpsc::UnboundedSender<LogEntry>,
}

impl GraphLogger {
    /// Create a logger and the stream its entries arrive on
    pub fn channel() -> (Self, LogStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }

    pub fn emit(&self, entry: LogEntry) {
        let node_id = entry.node.as_ref().map(|n| n.id.as_str()).unwrap_or("-");
        match entry.level {
            LogLevel::Info => tracing::info!("📝 [{}] {}", node_id, entry.message),
            LogLevel::Error => tracing::error!("❌ [{}] {}", node_id, entry.message),
        }
        let _ = self.tx.send(entry);
    }
}
