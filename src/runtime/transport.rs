/// HTTP transport used by request nodes
///
/// Request nodes build an `HttpRequest` and hand it to an `HttpTransport`. The default
/// transport is a shared reqwest client; tests plug in scripted transports instead.

use crate::error::RequestFailure;
use crate::flow::types::HttpMethod;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Message reported when no response was received at all
pub const TRANSPORT_UNAVAILABLE_MESSAGE: &str = "An unknown error occurred while running the request";

/// Fully resolved outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: HttpBody,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: HttpBody::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Empty,
    Json(Value),
    Text(String),
    /// Single-part multipart upload
    Multipart {
        field: String,
        file_name: String,
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

/// Successful (2xx) response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON when the body is JSON, otherwise the body text
    pub data: Value,
}

impl HttpResponse {
    /// Shape stored in the run variables under the request node's id
    pub fn to_value(&self) -> Value {
        json!({
            "status": self.status,
            "statusText": self.status_text,
            "headers": self.headers,
            "data": self.data,
        })
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request; non-2xx replies come back as `RequestFailure::Response`
    async fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, RequestFailure>;
}

/// Transport backed by a shared reqwest client
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
    }
}

fn unavailable(reason: impl std::fmt::Display) -> RequestFailure {
    tracing::warn!("🔌 No response received: {}", reason);
    RequestFailure::TransportUnavailable {
        message: TRANSPORT_UNAVAILABLE_MESSAGE.to_string(),
    }
}

/// Parse a body as JSON if possible, otherwise keep it as text
pub fn parse_body(text: String) -> Value {
    serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, RequestFailure> {
        tracing::debug!("🌍 HTTP Request: {} {}", request.method, request.url);
        tracing::debug!("📋 Headers: {:?}", request.headers);

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url.as_str())
            .timeout(timeout);

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            HttpBody::Empty => builder,
            HttpBody::Json(body) => builder.json(&body),
            HttpBody::Text(text) => builder.header("Content-Type", "text/plain").body(text),
            HttpBody::Multipart {
                field,
                file_name,
                content_type,
                bytes,
            } => {
                let mut part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
                if let Some(content_type) = content_type {
                    part = part.mime_str(&content_type).map_err(unavailable)?;
                }
                builder.multipart(reqwest::multipart::Form::new().part(field, part))
            }
        };

        let response = builder.send().await.map_err(unavailable)?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        tracing::debug!("📡 Response status: {}", status);

        let text = response.text().await.map_err(unavailable)?;
        let data = parse_body(text);

        if !status.is_success() {
            return Err(RequestFailure::Response {
                status: status.as_u16(),
                status_text,
                data,
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text,
            headers,
            data,
        })
    }
}
