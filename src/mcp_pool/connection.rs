// ABOUTME: Lightweight backend: a per-user HTTP client routed to one shared MCP endpoint
// ABOUTME: Routing rides on an x-user-id header; teardown just drops the client

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::debug;

use super::config::ConnectionPoolConfig;
use super::handle::{Backing, HandleKind, UserId};
use super::manager::PoolManager;
use super::provisioner::{ProvisionError, Provisioned, Provisioner};
use crate::mcp::McpClient;

/// Header carrying the user id to the shared endpoint.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Ownership token for a logical connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBacking {
    pub connection_id: String,
}

impl Backing for ConnectionBacking {}

/// Builds one HTTP client per user against the shared endpoint
#[derive(Debug, Clone)]
pub struct ConnectionProvisioner {
    base_url: String,
    request_timeout: Duration,
}

impl ConnectionProvisioner {
    pub fn new(config: &ConnectionPoolConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            request_timeout: config.request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Provisioner for ConnectionProvisioner {
    type Backing = ConnectionBacking;

    fn kind(&self) -> HandleKind {
        HandleKind::LogicalConnection
    }

    async fn provision(&self, user: &UserId) -> Result<Provisioned<ConnectionBacking>, ProvisionError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(user.as_str())?);

        let http = reqwest::Client::builder()
            .user_agent(concat!("mcp-gateway/", env!("CARGO_PKG_VERSION")))
            .timeout(self.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(ProvisionError::HttpClient)?;

        let connection_id = format!("mcp_{user}");
        debug!(user = %user, connection = %connection_id, "Opened logical connection");

        Ok(Provisioned {
            client: McpClient::new(http, self.base_url.clone()),
            backing: ConnectionBacking { connection_id },
        })
    }

    async fn teardown(&self, user: &UserId, backing: &ConnectionBacking) -> Result<(), ProvisionError> {
        debug!(user = %user, connection = %backing.connection_id, "Closed logical connection");
        Ok(())
    }
}

impl PoolManager<ConnectionProvisioner> {
    /// Manager for per-user connections to the shared endpoint.
    pub fn connections(config: &ConnectionPoolConfig) -> Self {
        Self::new(
            ConnectionProvisioner::new(config),
            config.max_connections,
            config.reap_settings(),
        )
    }
}
