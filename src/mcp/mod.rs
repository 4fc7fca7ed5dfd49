// ABOUTME: MCP wire protocol used over a pooled handle
//
// Every exchange is a JSON-RPC style request/response over HTTP POST:
// - types: envelopes, error object, request ids, tool descriptors
// - client: framing, id correlation, and error classification

pub mod client;
pub mod types;

pub use client::{CallError, McpClient};
pub use types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpMethod, RequestId, ToolArguments,
    ToolCallParams, ToolInfo, JSONRPC_VERSION, METHOD_NOT_FOUND,
};
