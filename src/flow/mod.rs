/// Flow definitions and persistence
///
/// This module holds everything about a flow that exists before it runs:
/// - The data model (nodes, edges, per-variant payloads)
/// - Graph validation on top of petgraph
/// - The `.flow` document serializer
/// - Filesystem storage for flows and environments

// Core data model
pub mod types;

// Validated petgraph view of a flow
pub mod graph;

// `.flow` document format
pub mod serializer;

// `.flow` files inside a collection directory
pub mod storage;

// `.env` files that seed run variables
pub mod environment;

// Re-export main types
pub use graph::{FlowGraph, ValidationError};
pub use serializer::{FlowSerializer, LoadedFlow};
pub use storage::FlowStore;
pub use types::{Edge, FlowData, Node, NodeData, NodeType};
