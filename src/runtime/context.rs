/// Per-run execution context
///
/// Holds the run's variables, the reserved auth slot, the deadline and the
/// cancellation token. One context belongs to exactly one run; only the token is
/// shared with other tasks.

use crate::nodes::auth::AuthFragment;
use crate::nodes::NodeError;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default run timeout when the caller supplies none
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Run-scoped variables, keyed by name
pub type Variables = BTreeMap<String, Value>;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{\s*([^}\s]+)\s*\}").expect("valid placeholder pattern"))
}

fn exact_placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*\$\{\s*([^}\s]+)\s*\}\s*$").expect("valid placeholder pattern")
    })
}

/// Mutable state of one run
#[derive(Debug)]
pub struct ExecutionContext {
    run_id: Uuid,
    variables: Variables,
    /// Reserved namespace written by auth nodes and read by request nodes
    auth: Option<AuthFragment>,
    timeout: Duration,
    deadline: Instant,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Create a context whose deadline starts counting now
    pub fn new(timeout: Duration) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            variables: Variables::new(),
            auth: None,
            timeout,
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Seed initial variables
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Use a caller-owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn into_variables(self) -> Variables {
        self.variables
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Write a variable; later writes shadow earlier ones
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn auth(&self) -> Option<&AuthFragment> {
        self.auth.as_ref()
    }

    pub fn set_auth(&mut self, fragment: Option<AuthFragment>) {
        self.auth = fragment;
    }

    /// Token a second task can use to cancel this run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Check the cancellation flag, then the deadline
    pub fn checkpoint(&self) -> Result<(), NodeError> {
        if self.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        if self.is_expired() {
            return Err(NodeError::TimedOut);
        }
        Ok(())
    }

    /// Run a suspending operation under this run's cancellation and deadline
    ///
    /// Checks both at entry and exit and races them while the operation is pending,
    /// so the operation either completes fully or its output is discarded.
    pub async fn guard<F, T>(&self, operation: F) -> Result<T, NodeError>
    where
        F: Future<Output = T>,
    {
        self.checkpoint()?;
        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(NodeError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => return Err(NodeError::TimedOut),
            output = operation => output,
        };
        self.checkpoint()?;
        Ok(output)
    }

    /// Look up a dotted variable path such as `login.data.token` or `list.data.0.id`
    ///
    /// The first segment names the variable; later segments walk object keys and
    /// array indices.
    pub fn resolve_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.variables.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replace every `${path}` token with the variable's text
    ///
    /// Unknown variables leave the token untouched.
    pub fn interpolate(&self, template: &str) -> String {
        placeholder_pattern()
            .replace_all(template, |caps: &Captures| match self.resolve_path(&caps[1]) {
                Some(value) => value_to_text(value),
                None => {
                    tracing::warn!("⚠️ Variable '{}' not found, leaving placeholder", &caps[1]);
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// Resolve an operand: a lone `${path}` keeps the variable's JSON type,
    /// anything else is interpolated text
    pub fn resolve_operand(&self, operand: &str) -> Value {
        if let Some(caps) = exact_placeholder_pattern().captures(operand) {
            return self.resolve_path(&caps[1]).cloned().unwrap_or(Value::Null);
        }
        Value::String(self.interpolate(operand))
    }

    /// Resolve every string inside a JSON value, returning a new value
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_operand(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

/// Render a value the way it appears inside interpolated text
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
