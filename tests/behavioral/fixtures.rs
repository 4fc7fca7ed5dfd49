// ABOUTME: Shared test fixtures and utilities for behavioral tests
//
// Provides:
// - McpResponder: wiremock responder speaking enough MCP for the pool
// - mcp_server(): shared MCP endpoint for connection pools
// - FakeRuntime: in-process ContainerRuntime whose "containers" are MCP servers on their host port
// - free_port_window(): a run of currently unused loopback ports

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use mcp_gateway::docker::{
    ContainerError, ContainerRuntime, ManagedContainer, McpContainerSpec, SERVICE_LABEL, USER_LABEL,
};
use mcp_gateway::mcp_pool::{ConnectionPoolConfig, ContainerPoolConfig, USER_ID_HEADER};

/// Answers `tools/list`, `tools/call` (tool `whoami` only) and `ping`,
/// echoing the request id. Anything else gets -32601.
pub struct McpResponder {
    pub backend: String,
}

impl Respond for McpResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = request.body_json::<Value>() else {
            return ResponseTemplate::new(400);
        };
        let id = body.get("id").cloned().unwrap_or(Value::Null);
        let user = request
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");

        let result = match body.get("method").and_then(Value::as_str) {
            Some("tools/list") => json!({
                "tools": [{
                    "name": "whoami",
                    "description": "Report which backend served the call",
                    "inputSchema": {"type": "object"}
                }]
            }),
            Some("tools/call") if body["params"]["name"] == "whoami" => json!({
                "content": [{"type": "text", "text": format!("backend={} user={user}", self.backend)}]
            }),
            Some("ping") => json!({}),
            _ => {
                return ResponseTemplate::new(200).set_body_json(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32601, "message": "method not found"},
                    "id": id
                }));
            }
        };

        ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "result": result, "id": id}))
    }
}

async fn mount_mcp(server: &MockServer, backend: &str) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(McpResponder {
            backend: backend.to_string(),
        })
        .mount(server)
        .await;
}

/// Shared MCP endpoint, as used by the connection backend
pub async fn mcp_server() -> MockServer {
    let server = MockServer::start().await;
    mount_mcp(&server, "shared").await;
    server
}

/// Connection pool config pointed at `server`, reaper off
pub fn connection_config(server: &MockServer, capacity: usize) -> ConnectionPoolConfig {
    ConnectionPoolConfig {
        base_url: format!("{}/mcp", server.uri()),
        max_connections: capacity,
        request_timeout: Duration::from_secs(5),
        reaper_enabled: false,
        ..ConnectionPoolConfig::default()
    }
}

/// `len` consecutive loopback ports that were free a moment ago
pub fn free_port_window(len: u16) -> u16 {
    loop {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = probe.local_addr().unwrap().port();
        drop(probe);

        if u32::from(base) + u32::from(len) > u32::from(u16::MAX) {
            continue;
        }
        let all_free = (base..base + len).all(|port| TcpListener::bind(("127.0.0.1", port)).is_ok());
        if all_free {
            return base;
        }
    }
}

/// Container pool config over a fresh port window and data root, reaper and sweep off
pub fn container_config(capacity: usize, data_root: &TempDir) -> ContainerPoolConfig {
    let ports = u16::try_from(capacity).unwrap();
    ContainerPoolConfig {
        endpoint_host: "127.0.0.1".to_string(),
        base_port: free_port_window(ports),
        port_range: u32::from(ports),
        max_containers: capacity,
        data_root: data_root.path().to_path_buf(),
        request_timeout: Duration::from_secs(5),
        readiness_timeout: Duration::from_secs(5),
        readiness_poll_interval: Duration::from_millis(20),
        stop_grace: Duration::from_secs(1),
        pull_image: false,
        sweep_orphans_on_start: false,
        reaper_enabled: false,
        ..ContainerPoolConfig::default()
    }
}

/// Bind `port`, waiting briefly for a just-removed container's server to let go of it
async fn bind_reused(port: u16) -> Result<TcpListener, ContainerError> {
    let mut attempts = 0;
    loop {
        match TcpListener::bind(("127.0.0.1", port)) {
            Ok(listener) => return Ok(listener),
            Err(e) if attempts >= 50 => {
                return Err(ContainerError::OperationFailed(format!("port {port}: {e}")));
            }
            Err(_) => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

/// A container known to the fake daemon
pub struct FakeContainer {
    pub spec: McpContainerSpec,
    /// Running while the container is started
    _server: Option<MockServer>,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    containers: HashMap<String, FakeContainer>,
    created: usize,
    removed: usize,
}

/// In-process stand-in for the Docker daemon.
///
/// Starting a container binds an MCP server on its published host port, so
/// readiness probing and calls go over real HTTP. Clones share state.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container as if left behind by an earlier process
    pub fn seed(&self, spec: McpContainerSpec) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("orphan-{}", state.next_id);
        state.containers.insert(id.clone(), FakeContainer { spec, _server: None });
        id
    }

    pub fn live(&self) -> usize {
        self.state.lock().containers.len()
    }

    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    pub fn removed(&self) -> usize {
        self.state.lock().removed
    }

    /// Host ports of existing containers, sorted
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .state
            .lock()
            .containers
            .values()
            .map(|c| c.spec.host_port)
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Names of existing containers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .containers
            .values()
            .map(|c| c.spec.name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, _image: &str) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn remove_by_name(&self, name: &str) -> Result<bool, ContainerError> {
        let mut state = self.state.lock();
        let id = state
            .containers
            .iter()
            .find(|(_, c)| c.spec.name == name)
            .map(|(id, _)| id.clone());
        match id {
            Some(id) => {
                state.containers.remove(&id);
                state.removed += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create(&self, spec: &McpContainerSpec) -> Result<String, ContainerError> {
        let mut state = self.state.lock();
        if state.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(ContainerError::OperationFailed(format!("name {} already in use", spec.name)));
        }
        state.next_id += 1;
        state.created += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                _server: None,
            },
        );
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<(), ContainerError> {
        let (port, name) = {
            let state = self.state.lock();
            let container = state
                .containers
                .get(container_id)
                .ok_or_else(|| ContainerError::NotFound(container_id.to_string()))?;
            (container.spec.host_port, container.spec.name.clone())
        };

        let listener = bind_reused(port).await?;
        let server = MockServer::builder().listener(listener).start().await;
        mount_mcp(&server, &name).await;

        match self.state.lock().containers.get_mut(container_id) {
            Some(container) => {
                container._server = Some(server);
                Ok(())
            }
            None => Err(ContainerError::NotFound(container_id.to_string())),
        }
    }

    async fn stop_and_remove(&self, container_id: &str, _grace: Duration) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if state.containers.remove(container_id).is_some() {
            state.removed += 1;
        }
        Ok(())
    }

    async fn list_managed(&self, service: &str) -> Result<Vec<ManagedContainer>, ContainerError> {
        let state = self.state.lock();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.spec.labels.get(SERVICE_LABEL).map(String::as_str) == Some(service))
            .map(|(id, c)| ManagedContainer {
                id: id.clone(),
                name: c.spec.name.clone(),
                user: c.spec.labels.get(USER_LABEL).cloned(),
            })
            .collect())
    }
}
