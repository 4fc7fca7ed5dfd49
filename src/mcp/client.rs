// ABOUTME: HTTP transport for one MCP backend: frames JSON-RPC requests and classifies replies
// ABOUTME: Protocol errors surface as CallError::Protocol even when the HTTP status is 200

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpMethod, RequestId, ToolArguments,
    ToolCallParams, ToolInfo, ToolsListResult,
};

/// Longest slice of a non-JSON-RPC body kept in an error.
const MAX_ERROR_BODY: usize = 512;

/// Errors from a single MCP exchange.
#[derive(Debug, Error)]
pub enum CallError {
    /// Network failure talking to the backend
    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Non-success HTTP status without a JSON-RPC body
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Body was not a well-formed JSON-RPC response for this request
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Well-formed response carrying a non-null `error`
    #[error("MCP error: {0}")]
    Protocol(JsonRpcError),

    /// Caller or gateway cancelled the call before it completed
    #[error("Call cancelled")]
    Cancelled,
}

impl CallError {
    /// Whether this outcome should mark the handle as errored.
    ///
    /// Cancellation leaves the handle status untouched.
    #[must_use]
    pub const fn marks_handle(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// JSON-RPC error code for protocol errors.
    #[must_use]
    pub const fn protocol_code(&self) -> Option<i64> {
        match self {
            Self::Protocol(err) => Some(err.code),
            _ => None,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}

/// JSON-RPC client bound to one endpoint.
///
/// The underlying `reqwest::Client` carries the request timeout and any
/// per-user default headers; this type only frames and classifies exchanges.
#[derive(Debug)]
pub struct McpClient {
    http: Client,
    endpoint: String,
    next_id: AtomicI64,
}

impl McpClient {
    pub fn new(http: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Build a client with a dedicated HTTP client using `timeout`.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("mcp-gateway/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self::new(http, endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// List the tools the backend exposes.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, CallError> {
        let result = self.request(McpMethod::ToolsList, None).await?;
        let listed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| CallError::InvalidResponse(format!("tools/list result: {e}")))?;
        Ok(listed.tools)
    }

    /// Invoke a tool; the result is passed through untouched.
    pub async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<Value, CallError> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let params = serde_json::to_value(params)
            .map_err(|e| CallError::InvalidResponse(format!("encode tools/call params: {e}")))?;
        self.request(McpMethod::ToolsCall, Some(params)).await
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), CallError> {
        self.request(McpMethod::Ping, None).await.map(|_| ())
    }

    /// Perform one request/response exchange.
    pub async fn request(&self, method: McpMethod, params: Option<Value>) -> Result<Value, CallError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = JsonRpcRequest::new(method, params, id.clone());

        debug!(endpoint = %self.endpoint, method = %method, id = %id, "Sending MCP request");

        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(CallError::from_reqwest)?;

        let status = response.status();
        let body = response.bytes().await.map_err(CallError::from_reqwest)?;

        let envelope: JsonRpcResponse = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(CallError::InvalidResponse(format!("malformed body: {e}")));
            }
            Err(_) => {
                return Err(CallError::HttpStatus {
                    status: status.as_u16(),
                    body: truncate_body(&body),
                });
            }
        };

        classify(envelope, &id)
    }
}

/// Turn a decoded envelope into the call outcome.
fn classify(envelope: JsonRpcResponse, expected: &RequestId) -> Result<Value, CallError> {
    if let Some(error) = envelope.error {
        return Err(CallError::Protocol(error));
    }

    match &envelope.id {
        Some(id) if id == expected => {}
        other => {
            return Err(CallError::InvalidResponse(format!(
                "response id {} does not match request id {expected}",
                other.as_ref().map_or_else(|| "null".to_string(), ToString::to_string)
            )));
        }
    }

    envelope
        .result
        .ok_or_else(|| CallError::InvalidResponse("response has neither result nor error".to_string()))
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY {
        return text.into_owned();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
