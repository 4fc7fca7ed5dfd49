// ABOUTME: JSON-RPC 2.0 envelope types spoken between the gateway and MCP backends
// ABOUTME: Requests, responses, protocol errors, request ids and tool descriptors

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Constant `jsonrpc` version string carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Open key-value bag passed opaquely to a tool.
///
/// Each call owns its copy; nothing is shared with caller-held structures.
pub type ToolArguments = Map<String, Value>;

/// MCP methods the gateway issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McpMethod {
    /// `tools/list`, no params
    ToolsList,
    /// `tools/call`, params `{name, arguments}`
    ToolsCall,
    /// `ping`, no params
    Ping,
}

impl McpMethod {
    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::Ping => "ping",
        }
    }
}

impl std::fmt::Display for McpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request correlation id, chosen by the caller and echoed by the server.
///
/// JSON-RPC allows numbers or strings; the gateway always sends numbers but
/// accepts either form back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id
    Number(i64),
    /// String id
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Outgoing request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub params: Option<Value>,
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Build a request for `method` with optional params.
    pub fn new(method: McpMethod, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.as_str().to_string(),
            params,
            id,
        }
    }
}

/// Error object carried in a response's `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)
    }
}

/// Incoming response envelope.
///
/// `id` is optional because servers answer unparseable requests with a null id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// `Some(Value::Null)` for an explicit `"result": null`, `None` when absent.
    #[serde(skip_serializing_if = "Option::is_none", default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Option<RequestId>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Params of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: ToolArguments,
}

/// A tool advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Result body of `tools/list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
}
