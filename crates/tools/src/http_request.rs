//! HTTP request tool backed by the per-session client pool.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext};
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;
use crate::http_pool::HttpClientPool;

const MAX_TEXT_CHARS: usize = 5000;

pub struct HttpRequestTool {
    pool: Arc<HttpClientPool>,
}

impl HttpRequestTool {
    pub fn new(pool: Arc<HttpClientPool>) -> Self {
        Self { pool }
    }
}

fn failed(reason: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "http_request".into(),
        reason: reason.into(),
    }
}

/// Validated request parameters.
#[derive(Debug)]
struct RequestSpec {
    url: reqwest::Url,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl RequestSpec {
    fn parse(params: &Value) -> Result<Self, ToolError> {
        let raw_url = params["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'url'".into()))?;
        let url = reqwest::Url::parse(raw_url)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid url '{raw_url}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::InvalidArguments(format!("unsupported scheme '{}'", url.scheme())));
        }

        let method = match params["method"].as_str().unwrap_or("GET").to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            other => return Err(ToolError::InvalidArguments(format!("unsupported method '{other}'"))),
        };

        let mut headers: Vec<(String, String)> = params["headers"]
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let sends_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);
        let body = match &params["body"] {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
        .filter(|_| sends_body);

        if body.is_some() && !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            headers.push(("Content-Type".into(), "application/json".into()));
        }

        Ok(Self {
            url,
            method,
            headers,
            body,
        })
    }
}

fn truncate_text(text: String) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        return text;
    }
    let head: String = text.chars().take(MAX_TEXT_CHARS).collect();
    format!("{head}... (truncated)")
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request to any URL. Supports GET, POST, PUT, PATCH, DELETE."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to request" },
                "method": {
                    "type": "string",
                    "description": "HTTP method",
                    "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"],
                    "default": "GET"
                },
                "headers": {
                    "type": "object",
                    "description": "Request headers as key-value pairs",
                    "additionalProperties": { "type": "string" }
                },
                "body": {
                    "type": "string",
                    "description": "Request body (for POST/PUT/PATCH)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let spec = RequestSpec::parse(&params)?;
        debug!(session_id = %ctx.session_id, method = %spec.method, url = %spec.url, "HTTP request");

        let client = self.pool.client_for(&ctx.session_id);
        let mut request = client.request(spec.method, spec.url);
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = spec.body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| failed(format!("request failed: {e}")))?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        let text = response
            .text()
            .await
            .map_err(|e| failed(format!("failed to read response body: {e}")))?;
        let data = if is_json {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(truncate_text(text)))
        } else {
            Value::String(truncate_text(text))
        };

        Ok(json!({
            "status": status.as_u16(),
            "statusText": status.canonical_reason().unwrap_or(""),
            "data": data,
        }))
    }
}
