/// Flowtest engine: flow graph execution for composable API test scenarios
///
/// This library loads `.flow` documents, validates them as directed graphs of typed
/// nodes, and runs them with a deadline and cooperative cancellation while streaming
/// an ordered run log.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by loading, validation and runs
pub mod error;

// Flow data model, graph validation, serializer and file storage
pub mod flow;

// Node type registry and the per-variant handlers
pub mod nodes;

// Runtime execution engine - context, executor, logger and run manager
pub mod runtime;

// HTTP API layer - run streaming and flow document endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{FlowError, RunError};
pub use flow::{Edge, FlowData, FlowGraph, FlowSerializer, FlowStore, LoadedFlow, Node, NodeData, NodeType};
pub use nodes::{NodeHandler, NodeRegistry};
pub use runtime::{FlowRun, FlowRunner, LogEntry, RunOptions, RunOutcome, RunResult};
pub use server::start_server;
