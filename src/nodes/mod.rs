/// Node type registry
///
/// Every node variant has one handler that knows how to persist its payload and how to
/// execute it. The executor and the serializer only ever talk to handlers through the
/// registry, so adding a variant means adding a handler here and nowhere else.

pub mod assert;
pub mod auth;
pub mod delay;
pub mod output;
pub mod request;
pub mod set_var;

use crate::error::{FlowError, RequestFailure, Result};
use crate::flow::graph::RESERVED_NODE_KEYS;
use crate::flow::types::{Metadata, Node, NodeData, NodeType};
use crate::runtime::context::ExecutionContext;
use crate::runtime::transport::{HttpTransport, ReqwestTransport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use assert::AssertNode;
pub use auth::{AuthFragment, AuthNode, CredentialResolver, StaticCredentialResolver};
pub use delay::DelayNode;
pub use output::OutputNode;
pub use request::RequestNode;
pub use set_var::SetVarNode;

/// What a node produced when it finished normally
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeOutcome {
    /// Log line summarizing the step; `None` keeps the step out of the run log
    pub summary: Option<String>,
    /// Structured data attached to the log line
    pub payload: Option<Value>,
    /// Branch selected by an assert node
    pub branch: Option<bool>,
}

impl NodeOutcome {
    /// Outcome that does not show up in the run log
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn logged(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..Self::default()
        }
    }

    pub fn branch(result: bool, summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            branch: Some(result),
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Ways a node can stop a run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    #[error("Request failed: {0}")]
    RequestFailed(RequestFailure),

    #[error("Invalid node data: {0}")]
    InvalidData(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run deadline exceeded")]
    TimedOut,

    /// Broken handler contract, e.g. a payload of the wrong variant
    #[error("Engine defect: {0}")]
    Defect(String),
}

impl From<FlowError> for NodeError {
    fn from(err: FlowError) -> Self {
        NodeError::Defect(err.to_string())
    }
}

/// Persistence and execution behavior of one node variant
#[async_trait]
pub trait NodeHandler: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Convert the typed payload to its persisted `data` object
    fn encode_data(&self, data: &NodeData) -> Result<Value>;

    /// Parse a persisted `data` object into the typed payload
    fn decode_data(&self, data: Value) -> Result<NodeData>;

    /// Persisted form of a node: `{id, type, data, ...metadata}`
    fn serialize(&self, id: &str, data: &NodeData, metadata: &Metadata) -> Result<Value> {
        let mut document = metadata.clone();
        document.insert("id".to_string(), Value::String(id.to_string()));
        document.insert(
            "type".to_string(),
            Value::String(self.node_type().as_tag().to_string()),
        );
        document.insert("data".to_string(), self.encode_data(data)?);
        Ok(Value::Object(document))
    }

    /// Inverse of [`NodeHandler::serialize`]; the input document is left untouched
    fn deserialize(&self, document: &Value) -> Result<Node> {
        let object = document
            .as_object()
            .ok_or_else(|| FlowError::malformed("node entry is not an object"))?;
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::malformed("node entry is missing a string 'id'"))?;
        let data = object.get("data").cloned().unwrap_or(Value::Null);
        let data = self
            .decode_data(data)
            .map_err(|e| FlowError::malformed(format!("node '{}': {}", id, e)))?;
        let metadata: Metadata = object
            .iter()
            .filter(|(key, _)| !RESERVED_NODE_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Node {
            id: id.to_string(),
            data,
            metadata,
        })
    }

    /// Run the node against the run's context
    async fn execute(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
    ) -> std::result::Result<NodeOutcome, NodeError>;
}

/// Error for a handler handed another variant's payload
pub(crate) fn payload_mismatch(expected: NodeType, data: &NodeData) -> FlowError {
    FlowError::PayloadMismatch {
        expected,
        found: data.node_type(),
    }
}

/// Decode a `data` object with serde, naming the variant on failure
pub(crate) fn decode_payload<T: serde::de::DeserializeOwned>(
    node_type: NodeType,
    data: Value,
) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| FlowError::malformed(format!("invalid {} data: {}", node_type, e)))
}

/// Handlers keyed by node type
pub struct NodeRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    /// Registry with no handlers
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with a handler for every variant, using the given collaborators
    pub fn with_defaults(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(RequestNode::new(transport)));
        registry.register(Arc::new(AssertNode));
        registry.register(Arc::new(DelayNode));
        registry.register(Arc::new(SetVarNode));
        registry.register(Arc::new(OutputNode));
        registry.register(Arc::new(AuthNode::new(credentials)));
        registry
    }

    /// Registry wired to the reqwest transport and the static credential resolver
    pub fn standard() -> Self {
        Self::with_defaults(
            Arc::new(ReqwestTransport::default()),
            Arc::new(StaticCredentialResolver),
        )
    }

    /// Add or replace the handler for its node type
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) -> Option<Arc<dyn NodeHandler>> {
        let node_type = handler.node_type();
        tracing::debug!("🧩 Registering handler for {}", node_type);
        self.handlers.insert(node_type, handler)
    }

    pub fn get(&self, node_type: NodeType) -> Result<&Arc<dyn NodeHandler>> {
        self.handlers
            .get(&node_type)
            .ok_or(FlowError::UnregisteredNodeType(node_type))
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.handlers.contains_key(&node_type)
    }

    /// Persisted form of a node via its variant's handler
    pub fn serialize_node(&self, node: &Node) -> Result<Value> {
        self.get(node.node_type())?
            .serialize(&node.id, &node.data, &node.metadata)
    }

    /// Parse a persisted node, dispatching on its `type` tag
    pub fn deserialize_node(&self, document: &Value) -> Result<Node> {
        let tag = document
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::malformed("node entry is missing a string 'type'"))?;
        let node_type = NodeType::from_tag(tag)
            .ok_or_else(|| FlowError::malformed(format!("unknown node type '{}'", tag)))?;
        self.get(node_type)?.deserialize(document)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("NodeRegistry").field("handlers", &types).finish()
    }
}
