// ABOUTME: Behavioral tests for MCP exchanges and how failures are classified on the wire

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcp_gateway::mcp::{CallError, McpClient, ToolArguments, METHOD_NOT_FOUND};

use crate::fixtures::mcp_server;

fn client(server: &MockServer) -> McpClient {
    McpClient::with_timeout(format!("{}/mcp", server.uri()), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_tools_list_and_call_round_trip() {
    let server = mcp_server().await;
    let client = client(&server);

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "whoami");
    assert_eq!(tools[0].input_schema, json!({"type": "object"}));

    // Ids keep advancing; the responder echoes them
    let result = client.call_tool("whoami", ToolArguments::new()).await.unwrap();
    assert_eq!(result["content"][0]["type"], "text");
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_unknown_tool_is_protocol_error() {
    let server = mcp_server().await;

    let err = client(&server)
        .call_tool("nope", ToolArguments::new())
        .await
        .unwrap_err();

    assert_eq!(err.protocol_code(), Some(METHOD_NOT_FOUND));
    assert!(err.marks_handle());
}

#[tokio::test]
async fn test_non_json_error_status_is_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    match client(&server).ping().await.unwrap_err() {
        CallError::HttpStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "upstream unavailable");
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_mismatched_id_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "ping"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "result": {}, "id": 999})))
        .mount(&server)
        .await;

    assert!(matches!(
        client(&server).ping().await,
        Err(CallError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "result": {}, "id": 1}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = McpClient::with_timeout(format!("{}/mcp", server.uri()), Duration::from_millis(200)).unwrap();
    assert!(matches!(client.ping().await, Err(CallError::Timeout)));
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = McpClient::with_timeout(format!("http://127.0.0.1:{port}/mcp"), Duration::from_secs(2)).unwrap();

    assert!(matches!(client.ping().await, Err(CallError::Transport(_))));
}
