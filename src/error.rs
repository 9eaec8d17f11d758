/// Error types for flow loading, validation and run outcomes
///
/// `FlowError` covers everything that can go wrong before a run starts or while a flow
/// is read from or written to disk. `RunError` is the structured, serializable error
/// recorded in a run result; it never escapes a run as a Rust error.

use crate::flow::graph::ValidationError;
use crate::flow::types::{BranchLabel, NodeType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type alias using FlowError
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors raised while loading, validating or persisting flows
#[derive(Debug, Error)]
pub enum FlowError {
    /// Structural invariant of the graph violated
    #[error("Invalid flow graph: {0}")]
    GraphInvalid(#[from] ValidationError),

    /// Malformed on-disk document
    #[error("Malformed flow document: {0}")]
    Serialization(String),

    /// A node variant has no handler in the registry
    #[error("No handler registered for node type '{0}'")]
    UnregisteredNodeType(NodeType),

    /// A handler was given a payload of another variant
    #[error("Handler for '{expected}' received a '{found}' payload")]
    PayloadMismatch { expected: NodeType, found: NodeType },

    /// A flow or environment name that would escape its collection directory
    #[error("Invalid name '{0}'")]
    InvalidName(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create a serialization error with a message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

/// The two ways an HTTP request can fail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RequestFailure {
    /// The server replied with a non-success status
    #[serde(rename_all = "camelCase")]
    Response {
        status: u16,
        status_text: String,
        data: Value,
    },
    /// No response: connection refused, DNS failure, TLS error...
    #[serde(rename_all = "camelCase")]
    TransportUnavailable { message: String },
}

impl RequestFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestFailure::Response { status, .. } => Some(*status),
            RequestFailure::TransportUnavailable { .. } => None,
        }
    }
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestFailure::Response {
                status,
                status_text,
                ..
            } => write!(f, "server responded with {} {}", status, status_text),
            RequestFailure::TransportUnavailable { message } => f.write_str(message),
        }
    }
}

/// Structured error recorded in a run result
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RunError {
    /// The flow could not be turned into a valid graph
    #[error("Invalid flow graph: {message}")]
    GraphInvalid { message: String },

    /// The flow document could not be parsed
    #[error("Malformed flow document: {message}")]
    Serialization { message: String },

    /// An assert node selected a branch with no matching edge
    #[error("Assert node '{node}' has no '{label}' edge")]
    DeadEnd { node: String, label: BranchLabel },

    /// An HTTP request failed beyond the configured tolerance
    #[error("Request failed: {failure}")]
    RequestFailed { failure: RequestFailure },

    /// A node payload could not be applied at run time
    #[error("Invalid node data: {message}")]
    InvalidNodeData { message: String },

    /// The run deadline passed
    #[error("Run timed out after {timeout_ms} ms")]
    #[serde(rename_all = "camelCase")]
    TimedOut { timeout_ms: u64 },

    /// Broken registry contract; a bug, not a flow outcome
    #[error("Engine defect: {message}")]
    Defect { message: String },
}

impl From<FlowError> for RunError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::GraphInvalid(e) => RunError::GraphInvalid {
                message: e.to_string(),
            },
            FlowError::Serialization(message) => RunError::Serialization { message },
            FlowError::Json(e) => RunError::Serialization {
                message: e.to_string(),
            },
            other @ (FlowError::UnregisteredNodeType(_) | FlowError::PayloadMismatch { .. }) => {
                RunError::Defect {
                    message: other.to_string(),
                }
            }
            FlowError::Io(e) => RunError::Serialization {
                message: e.to_string(),
            },
            FlowError::InvalidName(name) => RunError::Serialization {
                message: format!("invalid name '{}'", name),
            },
        }
    }
}
