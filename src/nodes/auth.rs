/// Auth node: resolve a credential descriptor for subsequent requests
///
/// The resolved headers and query parameters live in the context's reserved auth slot
/// and are attached to every request node that runs after this one. A `no-auth` node
/// clears the slot.

use super::{decode_payload, payload_mismatch, NodeError, NodeHandler, NodeOutcome};
use crate::error::Result;
use crate::flow::types::{ApiKeyPlacement, AuthData, Node, NodeData, NodeType};
use crate::runtime::context::ExecutionContext;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Request decorations produced by an auth node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthFragment {
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
}

impl AuthFragment {
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut fragment = Self::default();
        fragment.headers.insert(name.into(), value.into());
        fragment
    }

    pub fn query_param(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            headers: BTreeMap::new(),
            query: vec![(name.into(), value.into())],
        }
    }
}

/// Turns a credential descriptor into request decorations
pub trait CredentialResolver: Send + Sync {
    /// `Ok(None)` means requests go out without credentials
    fn resolve(
        &self,
        descriptor: &AuthData,
        context: &ExecutionContext,
    ) -> std::result::Result<Option<AuthFragment>, NodeError>;
}

/// Resolver for credentials written directly into the flow, with `${var}` support
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCredentialResolver;

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(
        &self,
        descriptor: &AuthData,
        context: &ExecutionContext,
    ) -> std::result::Result<Option<AuthFragment>, NodeError> {
        let fragment = match descriptor {
            AuthData::NoAuth => return Ok(None),
            AuthData::Basic { username, password } => {
                let credentials = format!(
                    "{}:{}",
                    context.interpolate(username),
                    context.interpolate(password)
                );
                AuthFragment::header("Authorization", format!("Basic {}", STANDARD.encode(credentials)))
            }
            AuthData::Bearer { token } => {
                let token = context.interpolate(token);
                if token.trim().is_empty() {
                    return Err(NodeError::InvalidData("bearer token is empty".to_string()));
                }
                AuthFragment::header("Authorization", format!("Bearer {}", token))
            }
            AuthData::ApiKey { key, value, add_to } => {
                if key.trim().is_empty() {
                    return Err(NodeError::InvalidData("api key name is empty".to_string()));
                }
                let value = context.interpolate(value);
                match add_to {
                    ApiKeyPlacement::Header => AuthFragment::header(key.clone(), value),
                    ApiKeyPlacement::Query => AuthFragment::query_param(key.clone(), value),
                }
            }
        };
        Ok(Some(fragment))
    }
}

pub struct AuthNode {
    credentials: Arc<dyn CredentialResolver>,
}

impl AuthNode {
    pub fn new(credentials: Arc<dyn CredentialResolver>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl NodeHandler for AuthNode {
    fn node_type(&self) -> NodeType {
        NodeType::Auth
    }

    fn encode_data(&self, data: &NodeData) -> Result<Value> {
        match data {
            NodeData::Auth(auth) => Ok(serde_json::to_value(auth)?),
            other => Err(payload_mismatch(NodeType::Auth, other)),
        }
    }

    fn decode_data(&self, data: Value) -> Result<NodeData> {
        decode_payload(NodeType::Auth, data).map(NodeData::Auth)
    }

    async fn execute(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
    ) -> std::result::Result<NodeOutcome, NodeError> {
        let NodeData::Auth(descriptor) = &node.data else {
            return Err(payload_mismatch(NodeType::Auth, &node.data).into());
        };

        let fragment = self.credentials.resolve(descriptor, context)?;
        tracing::debug!(
            "🔐 Auth node '{}' {}",
            node.id,
            if fragment.is_some() { "set credentials" } else { "cleared credentials" }
        );
        context.set_auth(fragment);

        Ok(NodeOutcome::silent())
    }
}
