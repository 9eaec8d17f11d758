/// Runtime execution engine
///
/// This module runs validated flow graphs:
/// - Per-run execution context (variables, auth slot, deadline, cancellation)
/// - The graph executor state machine
/// - The run logger and its ordered log stream
/// - HTTP transport for request nodes
/// - The run manager that spawns and tracks runs

// Per-run state shared by node handlers
pub mod context;

// Graph walking executor
pub mod engine;

// Ordered run log
pub mod logger;

// Spawned runs and cancellation by id
pub mod runs;

// HTTP client used by request nodes
pub mod transport;

// Re-export main types
pub use context::{ExecutionContext, Variables};
pub use engine::{ExecutorConfig, GraphExecutor, RunOutcome, RunResult};
pub use logger::{GraphLogger, LogEntry, LogLevel, LogStream};
pub use runs::{FlowRun, FlowRunner, RunOptions};
