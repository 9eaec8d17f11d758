/// Delay node: suspend the run for a fixed number of milliseconds

use super::{decode_payload, payload_mismatch, NodeError, NodeHandler, NodeOutcome};
use crate::error::Result;
use crate::flow::types::{Node, NodeData, NodeType};
use crate::runtime::context::ExecutionContext;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct DelayNode;

#[async_trait]
impl NodeHandler for DelayNode {
    fn node_type(&self) -> NodeType {
        NodeType::Delay
    }

    fn encode_data(&self, data: &NodeData) -> Result<Value> {
        match data {
            NodeData::Delay(delay) => Ok(serde_json::to_value(delay)?),
            other => Err(payload_mismatch(NodeType::Delay, other)),
        }
    }

    fn decode_data(&self, data: Value) -> Result<NodeData> {
        decode_payload(NodeType::Delay, data).map(NodeData::Delay)
    }

    async fn execute(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
    ) -> std::result::Result<NodeOutcome, NodeError> {
        let NodeData::Delay(data) = &node.data else {
            return Err(payload_mismatch(NodeType::Delay, &node.data).into());
        };

        tracing::debug!("⏳ Delay node '{}' sleeping {} ms", node.id, data.delay);
        // Cancellation and the run deadline both cut the sleep short
        context
            .guard(tokio::time::sleep(Duration::from_millis(data.delay)))
            .await?;

        Ok(NodeOutcome::logged(format!("Waiting for {} ms", data.delay)))
    }
}
