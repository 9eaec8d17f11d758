/// Assert node: compare two operands and pick the `true` or `false` branch
///
/// Operands are resolved against the run variables first. A lone `${path}` keeps the
/// variable's JSON type; everything else becomes interpolated text. Comparison then
/// coerces between numbers, numeric strings and boolean strings.

use super::{decode_payload, payload_mismatch, NodeError, NodeHandler, NodeOutcome};
use crate::error::Result;
use crate::flow::types::{AssertOperator, Node, NodeData, NodeType};
use crate::runtime::context::{value_to_text, ExecutionContext};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct AssertNode;

#[async_trait]
impl NodeHandler for AssertNode {
    fn node_type(&self) -> NodeType {
        NodeType::Assert
    }

    fn encode_data(&self, data: &NodeData) -> Result<Value> {
        match data {
            NodeData::Assert(assert) => Ok(serde_json::to_value(assert)?),
            other => Err(payload_mismatch(NodeType::Assert, other)),
        }
    }

    fn decode_data(&self, data: Value) -> Result<NodeData> {
        decode_payload(NodeType::Assert, data).map(NodeData::Assert)
    }

    async fn execute(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
    ) -> std::result::Result<NodeOutcome, NodeError> {
        let NodeData::Assert(data) = &node.data else {
            return Err(payload_mismatch(NodeType::Assert, &node.data).into());
        };

        let left = context.resolve_operand(&data.var1);
        let right = context.resolve_operand(&data.var2);
        let result = evaluate(data.operator, &left, &right);
        tracing::debug!(
            "🔍 Assert '{}': {} {} {} = {}",
            node.id,
            left,
            data.operator,
            right,
            result
        );

        let summary = format!(
            "Assert : {} {} {} = {}",
            value_to_text(&left),
            data.operator,
            value_to_text(&right),
            result
        );
        Ok(NodeOutcome::branch(result, summary).with_payload(json!({
            "var1": left,
            "operator": data.operator,
            "var2": right,
            "result": result,
        })))
    }
}

/// Apply an operator to two resolved operands
pub fn evaluate(operator: AssertOperator, left: &Value, right: &Value) -> bool {
    match operator {
        AssertOperator::Equals => equal(left, right),
        AssertOperator::NotEquals => !equal(left, right),
        AssertOperator::GreaterThan => compare_numeric(left, right, |a, b| a > b),
        AssertOperator::LessThan => compare_numeric(left, right, |a, b| a < b),
        AssertOperator::Contains => contains(left, right),
    }
}

/// Equality with coercion between numbers, numeric strings and boolean strings
pub fn equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            match s.trim().to_lowercase().as_str() {
                "true" => *b,
                "false" => !*b,
                _ => false,
            }
        }
        (Value::String(a), Value::String(b)) => {
            // "1.0" equals "1"
            match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                (Ok(x), Ok(y)) => x == y,
                _ => false,
            }
        }
        _ => false,
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Ordering comparison; false whenever either side is not numeric
fn compare_numeric(left: &Value, right: &Value, compare: impl Fn(f64, f64) -> bool) -> bool {
    match (to_number(left), to_number(right)) {
        (Some(a), Some(b)) => compare(a, b),
        _ => false,
    }
}

/// Substring, array element or object key membership
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(value_to_text(needle).as_str()),
        Value::Array(items) => items.iter().any(|item| equal(item, needle)),
        Value::Object(map) => map.contains_key(value_to_text(needle).as_str()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::AssertData;

    fn assert_node(var1: &str, operator: AssertOperator, var2: &str) -> Node {
        Node::new(
            "check",
            NodeData::Assert(AssertData {
                var1: var1.to_string(),
                operator,
                var2: var2.to_string(),
            }),
        )
    }

    #[test]
    fn test_equal_cross_type() {
        assert!(equal(&json!("42"), &json!(42)));
        assert!(equal(&json!(200), &json!("200")));
        assert!(equal(&json!("true"), &json!(true)));
        assert!(equal(&json!("1.0"), &json!("1")));
        assert!(!equal(&json!("abc"), &json!(1)));
        assert!(!equal(&json!(null), &json!("")));
    }

    #[test]
    fn test_ordering_requires_numbers() {
        assert!(evaluate(AssertOperator::GreaterThan, &json!(5), &json!("3")));
        assert!(evaluate(AssertOperator::LessThan, &json!("2.5"), &json!(3)));
        assert!(!evaluate(AssertOperator::GreaterThan, &json!("b"), &json!("a")));
        assert!(!evaluate(AssertOperator::LessThan, &json!(null), &json!(1)));
    }

    #[test]
    fn test_contains_variants() {
        assert!(evaluate(AssertOperator::Contains, &json!("hello world"), &json!("world")));
        assert!(evaluate(AssertOperator::Contains, &json!([1, 2, 3]), &json!("2")));
        assert!(evaluate(AssertOperator::Contains, &json!({ "id": 1 }), &json!("id")));
        assert!(!evaluate(AssertOperator::Contains, &json!(12), &json!(1)));
    }

    #[tokio::test]
    async fn test_assert_selects_branch_from_variables() {
        let mut ctx = ExecutionContext::default();
        ctx.set("x", json!(5));

        let outcome = AssertNode
            .execute(&assert_node("${x}", AssertOperator::Equals, "5"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.branch, Some(true));
        assert_eq!(outcome.summary.as_deref(), Some("Assert : 5 equals 5 = true"));

        let outcome = AssertNode
            .execute(&assert_node("${x}", AssertOperator::NotEquals, "5"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.branch, Some(false));
    }

    #[tokio::test]
    async fn test_assert_on_response_status() {
        let mut ctx = ExecutionContext::default();
        ctx.set("fetch", json!({ "status": 404, "data": { "items": ["a", "b"] } }));

        let outcome = AssertNode
            .execute(&assert_node("${fetch.status}", AssertOperator::LessThan, "400"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.branch, Some(false));

        let outcome = AssertNode
            .execute(&assert_node("${fetch.data.items}", AssertOperator::Contains, "b"), &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.branch, Some(true));
    }
}
