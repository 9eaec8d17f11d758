/// Validated petgraph model of a single flow
///
/// Converts a `FlowData` into a directed graph, checking every structural invariant up
/// front so that the executor can walk it without re-validating. A `FlowGraph` is
/// immutable once built and can be shared between concurrent runs behind an `Arc`.

use crate::flow::types::{BranchLabel, Edge, FlowData, Node, NodeType};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Keys the serializer owns on persisted nodes and edges
pub const RESERVED_NODE_KEYS: [&str; 3] = ["id", "type", "data"];
pub const RESERVED_EDGE_KEYS: [&str; 4] = ["id", "source", "target", "label"];

/// Structural problem found while building a graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Flow has no nodes")]
    Empty,

    #[error("Duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("Duplicate edge id '{0}'")]
    DuplicateEdgeId(String),

    #[error("Edge '{edge_id}' references unknown node '{node_id}'")]
    UnknownNode { edge_id: String, node_id: String },

    #[error("Flow has no entry node (every node has an incoming edge)")]
    MissingEntryNode,

    #[error("Flow has multiple entry nodes: {}", .0.join(", "))]
    MultipleEntryNodes(Vec<String>),

    #[error("Node '{node_id}' ({node_type}) has {count} outgoing edges, at most one is allowed")]
    TooManyOutgoingEdges {
        node_id: String,
        node_type: NodeType,
        count: usize,
    },

    #[error("Edge '{edge_id}' leaving {node_type} node '{node_id}' must not carry a branch label")]
    UnexpectedBranchLabel {
        edge_id: String,
        node_id: String,
        node_type: NodeType,
    },

    #[error("Edge '{edge_id}' leaving assert node '{node_id}' needs a true/false label")]
    MissingBranchLabel { edge_id: String, node_id: String },

    #[error("Assert node '{node_id}' has more than one '{label}' edge")]
    DuplicateBranchLabel { node_id: String, label: BranchLabel },

    #[error("Cycle detected through non-branching edges")]
    CycleDetected,

    #[error("Metadata of '{owner}' uses reserved key '{key}'")]
    ReservedMetadataKey { owner: String, key: String },
}

/// A validated flow backed by a petgraph DiGraph
#[derive(Debug, Clone)]
pub struct FlowGraph {
    /// Nodes weighted with the full node, edges with the full edge
    graph: DiGraph<Node, Edge>,
    /// Mapping from node ID to graph node index
    node_id_to_index: HashMap<String, NodeIndex>,
    /// The single node without incoming edges
    entry: NodeIndex,
}

impl FlowGraph {
    /// Build and validate a graph from flow data
    ///
    /// Fails on the first invariant violation; no partially usable graph is returned.
    pub fn build(flow: &FlowData) -> Result<Self, ValidationError> {
        tracing::debug!(
            "🏗️ Building flow graph with {} nodes and {} edges",
            flow.nodes.len(),
            flow.edges.len()
        );

        if flow.nodes.is_empty() {
            return Err(ValidationError::Empty);
        }

        let mut graph = DiGraph::with_capacity(flow.nodes.len(), flow.edges.len());
        let mut node_id_to_index = HashMap::new();

        for node in &flow.nodes {
            check_reserved_keys(&node.id, &node.metadata, &RESERVED_NODE_KEYS)?;
            if node_id_to_index.contains_key(&node.id) {
                return Err(ValidationError::DuplicateNodeId(node.id.clone()));
            }
            let index = graph.add_node(node.clone());
            node_id_to_index.insert(node.id.clone(), index);
        }

        let mut edge_ids = HashSet::new();
        for edge in &flow.edges {
            check_reserved_keys(&edge.id, &edge.metadata, &RESERVED_EDGE_KEYS)?;
            if !edge_ids.insert(edge.id.as_str()) {
                return Err(ValidationError::DuplicateEdgeId(edge.id.clone()));
            }
            let lookup = |node_id: &str| {
                node_id_to_index
                    .get(node_id)
                    .copied()
                    .ok_or_else(|| ValidationError::UnknownNode {
                        edge_id: edge.id.clone(),
                        node_id: node_id.to_string(),
                    })
            };
            let from = lookup(&edge.source)?;
            let to = lookup(&edge.target)?;
            graph.add_edge(from, to, edge.clone());
        }

        for index in graph.node_indices() {
            check_outgoing_edges(&graph, index)?;
        }

        let entry = find_entry(&graph)?;
        check_acyclic_without_branches(&graph)?;

        tracing::debug!("✅ Flow graph valid, entry node '{}'", graph[entry].id);

        Ok(Self {
            graph,
            node_id_to_index,
            entry,
        })
    }

    /// The single node without incoming edges
    pub fn entry_node(&self) -> &Node {
        &self.graph[self.entry]
    }

    pub fn node_by_id(&self, id: &str) -> Option<&Node> {
        self.node_id_to_index.get(id).map(|&index| &self.graph[index])
    }

    /// Edges leaving `node_id`, in document order
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        let Some(&index) = self.node_id_to_index.get(node_id) else {
            return Vec::new();
        };
        let mut edges: Vec<(EdgeIndex, &Edge)> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|e| (e.id(), e.weight()))
            .collect();
        // petgraph yields outgoing edges newest first
        edges.sort_by_key(|(edge_index, _)| *edge_index);
        edges.into_iter().map(|(_, edge)| edge).collect()
    }

    /// Nodes in document order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Edges in document order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Copy the graph back into its plain data form
    pub fn to_flow_data(&self) -> FlowData {
        FlowData {
            nodes: self.nodes().cloned().collect(),
            edges: self.edges().cloned().collect(),
        }
    }
}

impl TryFrom<&FlowData> for FlowGraph {
    type Error = ValidationError;

    fn try_from(flow: &FlowData) -> Result<Self, Self::Error> {
        FlowGraph::build(flow)
    }
}

fn check_reserved_keys(
    owner: &str,
    metadata: &crate::flow::types::Metadata,
    reserved: &[&str],
) -> Result<(), ValidationError> {
    match reserved.iter().find(|key| metadata.contains_key(**key)) {
        Some(key) => Err(ValidationError::ReservedMetadataKey {
            owner: owner.to_string(),
            key: key.to_string(),
        }),
        None => Ok(()),
    }
}

/// Assert nodes own up to two labelled edges, everything else at most one plain edge
fn check_outgoing_edges(graph: &DiGraph<Node, Edge>, index: NodeIndex) -> Result<(), ValidationError> {
    let node = &graph[index];
    let outgoing: Vec<&Edge> = graph
        .edges_directed(index, Direction::Outgoing)
        .map(|e| e.weight())
        .collect();

    if node.node_type() != NodeType::Assert {
        if outgoing.len() > 1 {
            return Err(ValidationError::TooManyOutgoingEdges {
                node_id: node.id.clone(),
                node_type: node.node_type(),
                count: outgoing.len(),
            });
        }
        if let Some(edge) = outgoing.iter().find(|e| e.label.is_some()) {
            return Err(ValidationError::UnexpectedBranchLabel {
                edge_id: edge.id.clone(),
                node_id: node.id.clone(),
                node_type: node.node_type(),
            });
        }
        return Ok(());
    }

    let mut seen = HashSet::new();
    for edge in outgoing {
        let label = edge.label.ok_or_else(|| ValidationError::MissingBranchLabel {
            edge_id: edge.id.clone(),
            node_id: node.id.clone(),
        })?;
        if !seen.insert(label) {
            return Err(ValidationError::DuplicateBranchLabel {
                node_id: node.id.clone(),
                label,
            });
        }
    }
    Ok(())
}

fn find_entry(graph: &DiGraph<Node, Edge>) -> Result<NodeIndex, ValidationError> {
    let roots: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|&index| {
            graph
                .neighbors_directed(index, Direction::Incoming)
                .next()
                .is_none()
        })
        .collect();

    match roots.as_slice() {
        [] => Err(ValidationError::MissingEntryNode),
        [entry] => Ok(*entry),
        many => Err(ValidationError::MultipleEntryNodes(
            many.iter().map(|&index| graph[index].id.clone()).collect(),
        )),
    }
}

/// Loops are only legal when they pass through an assert branch
fn check_acyclic_without_branches(graph: &DiGraph<Node, Edge>) -> Result<(), ValidationError> {
    let mut plain: DiGraph<(), ()> = DiGraph::with_capacity(graph.node_count(), graph.edge_count());
    for _ in graph.node_indices() {
        plain.add_node(());
    }
    for edge in graph.edge_references() {
        if graph[edge.source()].node_type() != NodeType::Assert {
            plain.add_edge(edge.source(), edge.target(), ());
        }
    }

    if is_cyclic_directed(&plain) {
        tracing::error!("❌ Flow contains a cycle through non-branching edges");
        return Err(ValidationError::CycleDetected);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{AssertData, AssertOperator, DelayData, NodeData, SetVarData};
    use serde_json::json;

    fn set_var(id: &str) -> Node {
        Node::new(
            id,
            NodeData::SetVar(SetVarData {
                name: "x".to_string(),
                value: json!(5),
            }),
        )
    }

    fn assert_node(id: &str) -> Node {
        Node::new(
            id,
            NodeData::Assert(AssertData {
                var1: "${x}".to_string(),
                operator: AssertOperator::Equals,
                var2: "5".to_string(),
            }),
        )
    }

    fn output(id: &str) -> Node {
        Node::new(id, NodeData::Output(json!(id)))
    }

    fn branching_flow() -> FlowData {
        FlowData {
            nodes: vec![set_var("set"), assert_node("check"), output("yes"), output("no")],
            edges: vec![
                Edge::new("e1", "set", "check"),
                Edge::branch("e2", "check", "yes", BranchLabel::True),
                Edge::branch("e3", "check", "no", BranchLabel::False),
            ],
        }
    }

    #[test]
    fn test_build_valid_branching_flow() {
        let graph = FlowGraph::build(&branching_flow()).unwrap();
        assert_eq!(graph.entry_node().id, "set");
        assert_eq!(graph.node_count(), 4);

        let out: Vec<&str> = graph
            .outgoing_edges("check")
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(out, vec!["e2", "e3"]);
        assert!(graph.outgoing_edges("yes").is_empty());
        assert!(graph.outgoing_edges("missing").is_empty());
        assert_eq!(graph.node_by_id("no").map(|n| n.id.as_str()), Some("no"));
        assert!(graph.node_by_id("missing").is_none());
    }

    #[test]
    fn test_to_flow_data_preserves_order() {
        let flow = branching_flow();
        let graph = FlowGraph::build(&flow).unwrap();
        assert_eq!(graph.to_flow_data(), flow);
    }

    #[test]
    fn test_rejects_empty_flow() {
        assert_eq!(
            FlowGraph::build(&FlowData::default()).unwrap_err(),
            ValidationError::Empty
        );
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut flow = branching_flow();
        flow.nodes.push(output("yes"));
        assert_eq!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::DuplicateNodeId("yes".to_string())
        );

        let mut flow = branching_flow();
        flow.edges[2].id = "e2".to_string();
        assert_eq!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::DuplicateEdgeId("e2".to_string())
        );
    }

    #[test]
    fn test_rejects_unknown_edge_endpoint() {
        let mut flow = branching_flow();
        flow.edges.push(Edge::new("e4", "yes", "ghost"));
        assert_eq!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::UnknownNode {
                edge_id: "e4".to_string(),
                node_id: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_multiple_entry_nodes() {
        let mut flow = branching_flow();
        flow.nodes.push(output("orphan"));
        assert_eq!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::MultipleEntryNodes(vec!["set".to_string(), "orphan".to_string()])
        );
    }

    #[test]
    fn test_rejects_second_edge_on_plain_node() {
        let mut flow = branching_flow();
        flow.nodes.push(output("extra"));
        flow.edges.push(Edge::new("e4", "set", "extra"));
        assert!(matches!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::TooManyOutgoingEdges { count: 2, .. }
        ));
    }

    #[test]
    fn test_rejects_label_on_plain_edge() {
        let mut flow = branching_flow();
        flow.edges[0].label = Some(BranchLabel::True);
        assert!(matches!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::UnexpectedBranchLabel { .. }
        ));
    }

    #[test]
    fn test_rejects_unlabeled_or_duplicate_assert_edges() {
        let mut flow = branching_flow();
        flow.edges[1].label = None;
        assert!(matches!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::MissingBranchLabel { .. }
        ));

        let mut flow = branching_flow();
        flow.edges[2].label = Some(BranchLabel::True);
        assert_eq!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::DuplicateBranchLabel {
                node_id: "check".to_string(),
                label: BranchLabel::True
            }
        );
    }

    #[test]
    fn test_cycle_through_plain_edges_is_rejected() {
        let flow = FlowData {
            nodes: vec![
                set_var("start"),
                Node::new("a", NodeData::Delay(DelayData { delay: 1 })),
                Node::new("b", NodeData::Delay(DelayData { delay: 1 })),
            ],
            edges: vec![
                Edge::new("e1", "start", "a"),
                Edge::new("e2", "a", "b"),
                Edge::new("e3", "b", "a"),
            ],
        };
        assert_eq!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::CycleDetected
        );
    }

    #[test]
    fn test_loop_through_assert_branch_is_allowed() {
        let flow = FlowData {
            nodes: vec![set_var("start"), assert_node("check"), output("done")],
            edges: vec![
                Edge::new("e1", "start", "check"),
                Edge::branch("e2", "check", "start", BranchLabel::False),
                Edge::branch("e3", "check", "done", BranchLabel::True),
            ],
        };
        // "start" now has an incoming edge, so the loop leaves no entry node
        assert_eq!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::MissingEntryNode
        );

        let flow = FlowData {
            nodes: vec![
                output("begin"),
                set_var("start"),
                assert_node("check"),
                output("done"),
            ],
            edges: vec![
                Edge::new("e0", "begin", "start"),
                Edge::new("e1", "start", "check"),
                Edge::branch("e2", "check", "start", BranchLabel::False),
                Edge::branch("e3", "check", "done", BranchLabel::True),
            ],
        };
        let graph = FlowGraph::build(&flow).unwrap();
        assert_eq!(graph.entry_node().id, "begin");
    }

    #[test]
    fn test_rejects_reserved_metadata_keys() {
        let mut flow = branching_flow();
        flow.nodes[0].metadata.insert("type".to_string(), json!("x"));
        assert_eq!(
            FlowGraph::build(&flow).unwrap_err(),
            ValidationError::ReservedMetadataKey {
                owner: "set".to_string(),
                key: "type".to_string()
            }
        );
    }
}
