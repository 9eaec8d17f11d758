/// Core flow type definitions
///
/// Defines the in-memory shape of a flow: typed nodes, branch-labelled edges and the
/// per-variant node payloads. Payload structs derive serde so that each variant's
/// on-disk form is an explicit nested object rather than a terse encoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Presentation fields the engine never interprets (position, width, sourceHandle...)
pub type Metadata = Map<String, Value>;

/// A complete flow: an ordered node list plus the edges connecting them
///
/// Identity is the storage path, so the flow itself carries no id or name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowData {
    /// Nodes in document order
    pub nodes: Vec<Node>,
    /// Directed edges between nodes
    pub edges: Vec<Edge>,
}

/// A single typed step of a flow
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Opaque node identifier, unique within the flow
    pub id: String,
    /// Variant-specific payload; the variant fixes the node type
    pub data: NodeData,
    /// Opaque presentation fields, round-tripped verbatim
    pub metadata: Metadata,
}

impl Node {
    pub fn new(id: impl Into<String>, data: NodeData) -> Self {
        Self {
            id: id.into(),
            data,
            metadata: Metadata::new(),
        }
    }

    /// Attach presentation metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.data.node_type()
    }
}

/// The closed set of node variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    /// Issue an HTTP request
    #[serde(rename = "requestNode")]
    Request,
    /// Compare two operands and branch on the result
    #[serde(rename = "assertNode")]
    Assert,
    /// Suspend the run for a number of milliseconds
    #[serde(rename = "delayNode")]
    Delay,
    /// Write a run variable
    #[serde(rename = "setVarNode")]
    SetVar,
    /// Emit a structured log payload
    #[serde(rename = "outputNode")]
    Output,
    /// Resolve credentials for subsequent requests
    #[serde(rename = "authNode")]
    Auth,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::Request,
        NodeType::Assert,
        NodeType::Delay,
        NodeType::SetVar,
        NodeType::Output,
        NodeType::Auth,
    ];

    /// Tag used for the `type` field of persisted nodes
    pub fn as_tag(&self) -> &'static str {
        match self {
            NodeType::Request => "requestNode",
            NodeType::Assert => "assertNode",
            NodeType::Delay => "delayNode",
            NodeType::SetVar => "setVarNode",
            NodeType::Output => "outputNode",
            NodeType::Auth => "authNode",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_tag() == tag)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Typed payload of a node, one variant per node type
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Request(RequestData),
    Assert(AssertData),
    Delay(DelayData),
    SetVar(SetVarData),
    Output(Value),
    Auth(AuthData),
}

impl NodeData {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeData::Request(_) => NodeType::Request,
            NodeData::Assert(_) => NodeType::Assert,
            NodeData::Delay(_) => NodeType::Delay,
            NodeData::SetVar(_) => NodeType::SetVar,
            NodeData::Output(_) => NodeType::Output,
            NodeData::Auth(_) => NodeType::Auth,
        }
    }
}

/// HTTP verbs a request node may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a request node
///
/// Expected data: { "method": "GET", "url": "https://api.example.com/pets/${petId}",
/// "headers": {...}, "requestBody": { "type": "raw-json", "body": "{...}" } }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub request_body: RequestBody,
}

/// Body of a request node in its explicit persisted form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RequestBody {
    #[default]
    #[serde(rename = "none")]
    None,
    /// JSON text, interpolated before sending
    #[serde(rename = "raw-json")]
    RawJson { body: String },
    /// Plain text, interpolated before sending
    #[serde(rename = "raw-txt")]
    RawText { body: String },
    /// Single file upload; `value` is a base64 data URL
    #[serde(rename = "form-data")]
    FormData {
        key: String,
        value: String,
        #[serde(default)]
        name: String,
    },
}

/// Comparison applied by an assert node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
}

impl fmt::Display for AssertOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            AssertOperator::Equals => "equals",
            AssertOperator::NotEquals => "notEquals",
            AssertOperator::GreaterThan => "greaterThan",
            AssertOperator::LessThan => "lessThan",
            AssertOperator::Contains => "contains",
        };
        f.write_str(symbol)
    }
}

/// Payload of an assert node: `var1 <operator> var2`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertData {
    pub var1: String,
    pub operator: AssertOperator,
    pub var2: String,
}

/// Payload of a delay node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayData {
    /// Suspension length in milliseconds
    pub delay: u64,
}

/// Payload of a setVar node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetVarData {
    pub name: String,
    pub value: Value,
}

/// Where an API key is attached on outgoing requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyPlacement {
    Header,
    Query,
}

/// Credential descriptor carried by an auth node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthData {
    #[serde(rename = "no-auth")]
    NoAuth,
    #[serde(rename = "basic-auth")]
    Basic { username: String, password: String },
    #[serde(rename = "bearer-token")]
    Bearer { token: String },
    #[serde(rename = "api-key", rename_all = "camelCase")]
    ApiKey {
        key: String,
        value: String,
        add_to: ApiKeyPlacement,
    },
}

/// Branch tag carried by the outgoing edges of an assert node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchLabel {
    True,
    False,
}

impl From<bool> for BranchLabel {
    fn from(result: bool) -> Self {
        if result {
            BranchLabel::True
        } else {
            BranchLabel::False
        }
    }
}

impl fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchLabel::True => f.write_str("true"),
            BranchLabel::False => f.write_str("false"),
        }
    }
}

/// Directed connection between two nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Branch tag, only present on assert node outputs
    pub label: Option<BranchLabel>,
    /// Opaque presentation fields, round-tripped verbatim
    pub metadata: Metadata,
}

impl Edge {
    /// Create an unlabeled edge
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
            metadata: Metadata::new(),
        }
    }

    /// Create a branch edge leaving an assert node
    pub fn branch(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        label: BranchLabel,
    ) -> Self {
        Self {
            label: Some(label),
            ..Self::new(id, source, target)
        }
    }
}
