/// Output node: emit a structured payload into the run log

use super::{payload_mismatch, NodeError, NodeHandler, NodeOutcome};
use crate::error::Result;
use crate::flow::types::{Node, NodeData, NodeType};
use crate::runtime::context::{value_to_text, ExecutionContext};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputNode;

#[async_trait]
impl NodeHandler for OutputNode {
    fn node_type(&self) -> NodeType {
        NodeType::Output
    }

    fn encode_data(&self, data: &NodeData) -> Result<Value> {
        match data {
            NodeData::Output(value) => Ok(value.clone()),
            other => Err(payload_mismatch(NodeType::Output, other)),
        }
    }

    fn decode_data(&self, data: Value) -> Result<NodeData> {
        Ok(NodeData::Output(data))
    }

    async fn execute(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
    ) -> std::result::Result<NodeOutcome, NodeError> {
        let NodeData::Output(template) = &node.data else {
            return Err(payload_mismatch(NodeType::Output, &node.data).into());
        };

        let payload = context.resolve_value(template);
        let summary = match &payload {
            Value::Null => format!("Output from '{}'", node.id),
            other => value_to_text(other),
        };
        Ok(NodeOutcome::logged(summary).with_payload(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_output_resolves_variables_into_payload() {
        let mut ctx = ExecutionContext::default();
        ctx.set("pet", json!({ "name": "Rex" }));
        let node = Node::new("out", NodeData::Output(json!({ "found": "${pet.name}" })));

        let outcome = OutputNode.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(outcome.payload, Some(json!({ "found": "Rex" })));
        assert_eq!(outcome.summary.as_deref(), Some(r#"{"found":"Rex"}"#));
    }

    #[tokio::test]
    async fn test_output_text_summary() {
        let mut ctx = ExecutionContext::default();
        let node = Node::new("out", NodeData::Output(json!("all good")));
        let outcome = OutputNode.execute(&node, &mut ctx).await.unwrap();
        assert_eq!(outcome.summary.as_deref(), Some("all good"));
    }

    #[test]
    fn test_output_data_round_trips_any_value() {
        let data = json!([1, { "a": null }]);
        let decoded = OutputNode.decode_data(data.clone()).unwrap();
        assert_eq!(OutputNode.encode_data(&decoded).unwrap(), data);
    }
}
