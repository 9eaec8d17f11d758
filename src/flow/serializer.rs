/// `.flow` document serializer
///
/// A flow document is a JSON object `{"nodes": [...], "edges": [...]}`. Nodes are
/// persisted by their registry handlers as `{id, type, data, ...metadata}`; edges as
/// `{id, source, target, label?, ...metadata}`. An empty document (`{}` or blank text)
/// is the "no flow yet" sentinel and loads as `LoadedFlow::NotLoaded`.
///
/// Text output uses a 4-space indent with object keys sorted, so saving the same flow
/// twice produces identical bytes.

use crate::error::{FlowError, Result};
use crate::flow::graph::RESERVED_EDGE_KEYS;
use crate::flow::types::{BranchLabel, Edge, FlowData, Metadata};
use crate::nodes::NodeRegistry;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Result of reading a flow document
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedFlow {
    /// The document was the empty sentinel
    NotLoaded,
    Loaded(FlowData),
}

impl LoadedFlow {
    pub fn into_flow(self) -> Option<FlowData> {
        match self {
            LoadedFlow::NotLoaded => None,
            LoadedFlow::Loaded(flow) => Some(flow),
        }
    }
}

impl From<FlowData> for LoadedFlow {
    fn from(flow: FlowData) -> Self {
        LoadedFlow::Loaded(flow)
    }
}

/// Converts flows to and from their persisted document form
#[derive(Debug, Clone)]
pub struct FlowSerializer {
    registry: Arc<NodeRegistry>,
}

impl FlowSerializer {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Document form of a flow
    pub fn to_document(&self, flow: &LoadedFlow) -> Result<Value> {
        let LoadedFlow::Loaded(flow) = flow else {
            return Ok(Value::Object(Map::new()));
        };

        let nodes = flow
            .nodes
            .iter()
            .map(|node| self.registry.serialize_node(node))
            .collect::<Result<Vec<_>>>()?;
        let edges = flow.edges.iter().map(edge_to_document).collect();

        let mut document = Map::new();
        document.insert("nodes".to_string(), Value::Array(nodes));
        document.insert("edges".to_string(), Value::Array(edges));
        Ok(Value::Object(document))
    }

    /// Parse a document; the input is not modified
    pub fn from_document(&self, document: &Value) -> Result<LoadedFlow> {
        let object = match document {
            Value::Null => return Ok(LoadedFlow::NotLoaded),
            Value::Object(object) if object.is_empty() => return Ok(LoadedFlow::NotLoaded),
            Value::Object(object) => object,
            _ => return Err(FlowError::malformed("flow document is not a JSON object")),
        };

        let nodes = object
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| FlowError::malformed("flow document has no 'nodes' array"))?
            .iter()
            .map(|node| self.registry.deserialize_node(node))
            .collect::<Result<Vec<_>>>()?;

        let edges = match object.get("edges") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(edges)) => edges
                .iter()
                .map(edge_from_document)
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(FlowError::malformed("flow document 'edges' is not an array")),
        };

        Ok(LoadedFlow::Loaded(FlowData { nodes, edges }))
    }

    /// Pretty-printed document text
    pub fn to_text(&self, flow: &LoadedFlow) -> Result<String> {
        to_pretty_string(&self.to_document(flow)?)
    }

    /// Parse document text; blank text is the sentinel
    pub fn from_text(&self, text: &str) -> Result<LoadedFlow> {
        if text.trim().is_empty() {
            return Ok(LoadedFlow::NotLoaded);
        }
        let document: Value = serde_json::from_str(text)
            .map_err(|e| FlowError::malformed(format!("invalid JSON: {}", e)))?;
        self.from_document(&document)
    }
}

fn edge_to_document(edge: &Edge) -> Value {
    let mut document = edge.metadata.clone();
    document.insert("id".to_string(), Value::String(edge.id.clone()));
    document.insert("source".to_string(), Value::String(edge.source.clone()));
    document.insert("target".to_string(), Value::String(edge.target.clone()));
    if let Some(label) = edge.label {
        document.insert("label".to_string(), Value::String(label.to_string()));
    }
    Value::Object(document)
}

fn edge_from_document(document: &Value) -> Result<Edge> {
    let object = document
        .as_object()
        .ok_or_else(|| FlowError::malformed("edge entry is not an object"))?;
    let field = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| FlowError::malformed(format!("edge entry is missing a string '{}'", name)))
    };
    let id = field("id")?;
    let source = field("source")?;
    let target = field("target")?;

    let label = match object.get("label") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(result)) => Some(BranchLabel::from(*result)),
        Some(other) => Some(
            serde_json::from_value::<BranchLabel>(other.clone())
                .map_err(|_| FlowError::malformed(format!("edge '{}' has an invalid label {}", id, other)))?,
        ),
    };

    let metadata: Metadata = object
        .iter()
        .filter(|(key, _)| !RESERVED_EDGE_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(Edge {
        id,
        source,
        target,
        label,
        metadata,
    })
}

/// Serialize with a 4-space indent and sorted object keys
pub fn to_pretty_string(value: &Value) -> Result<String> {
    let value = sort_keys(value);
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(buffer).map_err(|e| FlowError::malformed(e.to_string()))
}

/// Copy of `value` with every object's keys in sorted order
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{
        AssertData, AssertOperator, AuthData, DelayData, HttpMethod, Node, NodeData, RequestBody,
        RequestData,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn serializer() -> FlowSerializer {
        FlowSerializer::new(Arc::new(NodeRegistry::standard()))
    }

    fn sample_flow() -> FlowData {
        let mut position = Metadata::new();
        position.insert("position".to_string(), json!({ "x": 0, "y": 100 }));
        let mut handle = Metadata::new();
        handle.insert("sourceHandle".to_string(), json!("true"));

        FlowData {
            nodes: vec![
                Node::new("auth", NodeData::Auth(AuthData::Bearer { token: "${token}".to_string() }))
                    .with_metadata(position),
                Node::new(
                    "fetch",
                    NodeData::Request(RequestData {
                        method: HttpMethod::Post,
                        url: "https://api.example.com/pets".to_string(),
                        headers: BTreeMap::new(),
                        request_body: RequestBody::RawJson {
                            body: "{\"name\": \"Rex\"}".to_string(),
                        },
                    }),
                ),
                Node::new(
                    "check",
                    NodeData::Assert(AssertData {
                        var1: "${fetch.status}".to_string(),
                        operator: AssertOperator::Equals,
                        var2: "201".to_string(),
                    }),
                ),
                Node::new("wait", NodeData::Delay(DelayData { delay: 100 })),
            ],
            edges: vec![
                Edge::new("e1", "auth", "fetch"),
                Edge::new("e2", "fetch", "check"),
                Edge {
                    metadata: handle,
                    ..Edge::branch("e3", "check", "wait", BranchLabel::True)
                },
            ],
        }
    }

    #[test]
    fn test_text_round_trip_preserves_flow() {
        let serializer = serializer();
        let flow = LoadedFlow::Loaded(sample_flow());

        let text = serializer.to_text(&flow).unwrap();
        assert_eq!(serializer.from_text(&text).unwrap(), flow);
        // stable bytes on a second save
        let reloaded = serializer.from_text(&text).unwrap();
        assert_eq!(serializer.to_text(&reloaded).unwrap(), text);
    }

    #[test]
    fn test_text_uses_four_space_indent() {
        let text = serializer().to_text(&LoadedFlow::Loaded(sample_flow())).unwrap();
        assert!(text.starts_with("{\n    \"edges\": ["));
    }

    #[test]
    fn test_sentinel_documents() {
        let serializer = serializer();
        assert_eq!(serializer.from_text("{}").unwrap(), LoadedFlow::NotLoaded);
        assert_eq!(serializer.from_text("  \n").unwrap(), LoadedFlow::NotLoaded);
        assert_eq!(serializer.to_text(&LoadedFlow::NotLoaded).unwrap(), "{}");
    }

    #[test]
    fn test_document_layout() {
        let document = serializer()
            .to_document(&LoadedFlow::Loaded(sample_flow()))
            .unwrap();
        assert_eq!(document["nodes"][0]["type"], "authNode");
        assert_eq!(document["nodes"][0]["position"], json!({ "x": 0, "y": 100 }));
        assert_eq!(
            document["nodes"][0]["data"],
            json!({ "type": "bearer-token", "token": "${token}" })
        );
        assert_eq!(
            document["edges"][2],
            json!({ "id": "e3", "source": "check", "target": "wait", "label": "true", "sourceHandle": "true" })
        );
        assert!(document["edges"][0].get("label").is_none());
    }

    #[test]
    fn test_from_document_leaves_input_untouched() {
        let serializer = serializer();
        let document = serializer
            .to_document(&LoadedFlow::Loaded(sample_flow()))
            .unwrap();
        let before = document.clone();
        serializer.from_document(&document).unwrap();
        assert_eq!(document, before);
    }

    #[test]
    fn test_malformed_documents() {
        let serializer = serializer();
        assert!(matches!(
            serializer.from_text("not json"),
            Err(FlowError::Serialization(_))
        ));
        assert!(matches!(
            serializer.from_text(r#"{"edges": []}"#),
            Err(FlowError::Serialization(_))
        ));
        assert!(matches!(
            serializer.from_text(r#"{"nodes": [{"id": "a", "type": "mysteryNode", "data": {}}]}"#),
            Err(FlowError::Serialization(msg)) if msg.contains("mysteryNode")
        ));
        assert!(matches!(
            serializer.from_text(
                r#"{"nodes": [], "edges": [{"id": "e", "source": "a", "target": "b", "label": "maybe"}]}"#
            ),
            Err(FlowError::Serialization(_))
        ));
    }

    #[test]
    fn test_boolean_edge_labels_are_accepted() {
        let loaded = serializer()
            .from_text(
                r#"{"nodes": [], "edges": [{"id": "e", "source": "a", "target": "b", "label": false}]}"#,
            )
            .unwrap();
        let flow = loaded.into_flow().unwrap();
        assert_eq!(flow.edges[0].label, Some(BranchLabel::False));
    }
}
