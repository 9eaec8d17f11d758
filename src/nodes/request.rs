/// Request node: issue an HTTP request through the configured transport
///
/// URL, header values and text bodies are interpolated with the run variables. The
/// response is stored as a variable named after the node id:
/// `{"status", "statusText", "headers", "data"}`.

use super::{decode_payload, payload_mismatch, NodeError, NodeHandler, NodeOutcome};
use crate::error::Result;
use crate::flow::types::{Node, NodeData, NodeType, RequestBody, RequestData};
use crate::runtime::context::ExecutionContext;
use crate::runtime::transport::{HttpBody, HttpRequest, HttpTransport};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct RequestNode {
    transport: Arc<dyn HttpTransport>,
}

impl RequestNode {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

/// Resolve a request node's payload into a concrete request
pub fn build_request(
    data: &RequestData,
    context: &ExecutionContext,
) -> std::result::Result<HttpRequest, NodeError> {
    let mut request = HttpRequest::new(data.method, context.interpolate(&data.url));
    if request.url.trim().is_empty() {
        return Err(NodeError::InvalidData("request url is empty".to_string()));
    }

    request.headers = data
        .headers
        .iter()
        .map(|(key, value)| (key.clone(), context.interpolate(value)))
        .collect();

    if let Some(auth) = context.auth() {
        request
            .headers
            .extend(auth.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        request.query.extend(auth.query.iter().cloned());
    }

    request.body = match &data.request_body {
        RequestBody::None => HttpBody::Empty,
        RequestBody::RawJson { body } => {
            let text = context.interpolate(body);
            let value = serde_json::from_str(&text).map_err(|e| {
                NodeError::InvalidData(format!("raw-json body is not valid JSON: {}", e))
            })?;
            HttpBody::Json(value)
        }
        RequestBody::RawText { body } => HttpBody::Text(context.interpolate(body)),
        RequestBody::FormData { key, value, name } => {
            let (content_type, bytes) = decode_data_url(value)?;
            HttpBody::Multipart {
                field: key.clone(),
                file_name: name.clone(),
                content_type,
                bytes,
            }
        }
    };

    Ok(request)
}

/// Split a `data:<mime>;base64,<payload>` URL into its content type and bytes
pub fn decode_data_url(url: &str) -> std::result::Result<(Option<String>, Vec<u8>), NodeError> {
    let invalid = |reason: &str| NodeError::InvalidData(format!("form-data value {}", reason));

    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| invalid("is not a data URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("has no payload"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| invalid("is not base64 encoded"))?;
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| invalid(&format!("has invalid base64: {}", e)))?;

    let content_type = (!mime.is_empty()).then(|| mime.to_string());
    Ok((content_type, bytes))
}

#[async_trait]
impl NodeHandler for RequestNode {
    fn node_type(&self) -> NodeType {
        NodeType::Request
    }

    fn encode_data(&self, data: &NodeData) -> Result<Value> {
        match data {
            NodeData::Request(request) => Ok(serde_json::to_value(request)?),
            other => Err(payload_mismatch(NodeType::Request, other)),
        }
    }

    fn decode_data(&self, data: Value) -> Result<NodeData> {
        decode_payload(NodeType::Request, data).map(NodeData::Request)
    }

    async fn execute(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
    ) -> std::result::Result<NodeOutcome, NodeError> {
        let NodeData::Request(data) = &node.data else {
            return Err(payload_mismatch(NodeType::Request, &node.data).into());
        };

        let request = build_request(data, context)?;
        let summary = format!("{} {}", request.method, request.url);
        let request_log = json!({ "type": request.method, "url": request.url });

        tracing::debug!("🌐 Executing request node '{}': {}", node.id, summary);
        let response = context
            .guard(self.transport.send(request, context.remaining()))
            .await?
            .map_err(NodeError::RequestFailed)?;
        tracing::info!("✅ HTTP request completed: {} (status: {})", summary, response.status);

        let response = response.to_value();
        context.set(node.id.clone(), response.clone());

        Ok(NodeOutcome::logged(summary).with_payload(json!({
            "request": request_log,
            "response": response,
        })))
    }
}
