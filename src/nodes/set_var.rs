/// SetVar node: write a run variable
///
/// String values are resolved against the current variables first, so
/// `{"name": "token", "value": "${login.data.token}"}` copies a typed value out of an
/// earlier response.

use super::{decode_payload, payload_mismatch, NodeError, NodeHandler, NodeOutcome};
use crate::error::Result;
use crate::flow::types::{Node, NodeData, NodeType};
use crate::runtime::context::ExecutionContext;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct SetVarNode;

#[async_trait]
impl NodeHandler for SetVarNode {
    fn node_type(&self) -> NodeType {
        NodeType::SetVar
    }

    fn encode_data(&self, data: &NodeData) -> Result<Value> {
        match data {
            NodeData::SetVar(set_var) => Ok(serde_json::to_value(set_var)?),
            other => Err(payload_mismatch(NodeType::SetVar, other)),
        }
    }

    fn decode_data(&self, data: Value) -> Result<NodeData> {
        decode_payload(NodeType::SetVar, data).map(NodeData::SetVar)
    }

    async fn execute(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
    ) -> std::result::Result<NodeOutcome, NodeError> {
        let NodeData::SetVar(data) = &node.data else {
            return Err(payload_mismatch(NodeType::SetVar, &node.data).into());
        };
        if data.name.trim().is_empty() {
            return Err(NodeError::InvalidData(format!(
                "setVar node '{}' has an empty variable name",
                node.id
            )));
        }

        let value = context.resolve_value(&data.value);
        tracing::debug!("📝 Setting variable '{}' = {}", data.name, value);
        context.set(data.name.clone(), value);

        Ok(NodeOutcome::silent())
    }
}
