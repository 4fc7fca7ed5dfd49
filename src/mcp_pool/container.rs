// ABOUTME: Heavyweight backend: one Docker container per user on an allocated host port
// ABOUTME: Provisioning polls the MCP endpoint for readiness and never leaks a half-created container

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::ContainerPoolConfig;
use super::handle::{Backing, HandleKind, UserId};
use super::manager::PoolManager;
use super::port_allocator::PortAllocator;
use super::provisioner::{ProvisionError, Provisioned, Provisioner};
use crate::docker::{ContainerRuntime, McpContainerSpec};
use crate::mcp::{CallError, McpClient};

/// Per-probe timeout while waiting for a container to come up.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on the delay between readiness probes.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Ownership token for a running container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBacking {
    pub container_id: String,
    pub container_name: String,
    pub port: u16,
}

impl Backing for ContainerBacking {
    fn port(&self) -> Option<u16> {
        Some(self.port)
    }
}

/// Starts a private MCP server container per user.
pub struct ContainerProvisioner<R> {
    runtime: R,
    config: ContainerPoolConfig,
    ports: PortAllocator,
}

impl<R: ContainerRuntime> ContainerProvisioner<R> {
    pub fn new(runtime: R, config: ContainerPoolConfig) -> Result<Self, ProvisionError> {
        let ports = PortAllocator::new(config.base_port, config.port_range)?;
        Ok(Self {
            runtime,
            config,
            ports,
        })
    }

    pub const fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub const fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Remove containers left behind by an earlier process.
    ///
    /// The pool starts empty, so any managed container for this service is an orphan.
    pub async fn sweep_orphans(&self) -> Result<usize, ProvisionError> {
        let orphans = self.runtime.list_managed(&self.config.service_name).await?;

        let mut removed = 0;
        for orphan in orphans {
            match self.runtime.stop_and_remove(&orphan.id, self.config.stop_grace).await {
                Ok(()) => {
                    info!(container = %orphan.name, user = ?orphan.user, "Removed orphaned container");
                    removed += 1;
                }
                Err(e) => warn!(container = %orphan.name, error = %e, "Failed to remove orphaned container"),
            }
        }
        Ok(removed)
    }

    async fn provision_on_port(&self, user: &UserId, port: u16) -> Result<Provisioned<ContainerBacking>, ProvisionError> {
        let data_dir = self
            .config
            .user_data_dir(user.as_str())
            .map_err(|source| ProvisionError::DataDir {
                path: self.config.data_root.clone(),
                source,
            })?;
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|source| ProvisionError::DataDir {
                path: data_dir.clone(),
                source,
            })?;

        if self.config.pull_image {
            self.runtime.ensure_image(&self.config.image).await?;
        }

        let endpoint = self.config.endpoint(port);
        let client = McpClient::with_timeout(endpoint.clone(), self.config.request_timeout)
            .map_err(ProvisionError::HttpClient)?;

        let spec = McpContainerSpec::for_user(&self.config, user.as_str(), port, data_dir);
        if self.runtime.remove_by_name(&spec.name).await? {
            info!(user = %user, container = %spec.name, "Removed stale container");
        }

        let container_id = self.runtime.create(&spec).await?;

        if let Err(e) = self.boot(&container_id, &endpoint).await {
            warn!(user = %user, container = %spec.name, error = %e, "Container failed to start, removing");
            if let Err(cleanup) = self
                .runtime
                .stop_and_remove(&container_id, self.config.stop_grace)
                .await
            {
                warn!(container = %spec.name, error = %cleanup, "Cleanup after failed start failed");
            }
            return Err(e);
        }

        info!(user = %user, container = %spec.name, port, "Container ready");
        Ok(Provisioned {
            client,
            backing: ContainerBacking {
                container_id,
                container_name: spec.name,
                port,
            },
        })
    }

    async fn boot(&self, container_id: &str, endpoint: &str) -> Result<(), ProvisionError> {
        self.runtime.start(container_id).await?;
        self.wait_ready(endpoint).await
    }

    /// Probe with `ping` until the server answers, backing off between attempts.
    ///
    /// Any reply from the server counts, including a JSON-RPC error: only
    /// failing to reach it at all means it is still starting.
    async fn wait_ready(&self, endpoint: &str) -> Result<(), ProvisionError> {
        let probe = McpClient::with_timeout(endpoint, PROBE_TIMEOUT.min(self.config.readiness_timeout))
            .map_err(ProvisionError::HttpClient)?;

        let started = Instant::now();
        let deadline = started + self.config.readiness_timeout;
        let mut delay = self.config.readiness_poll_interval;

        loop {
            match probe.ping().await {
                Ok(())
                | Err(CallError::Protocol(_) | CallError::HttpStatus { .. } | CallError::InvalidResponse(_)) => {
                    debug!(endpoint, waited = ?started.elapsed(), "Backend answered");
                    return Ok(());
                }
                Err(e) => debug!(endpoint, error = %e, "Backend not ready yet"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProvisionError::ReadinessTimeout {
                    endpoint: endpoint.to_string(),
                    waited: self.config.readiness_timeout,
                });
            }

            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(MAX_POLL_INTERVAL);
        }
    }
}

#[async_trait]
impl<R: ContainerRuntime> Provisioner for ContainerProvisioner<R> {
    type Backing = ContainerBacking;

    fn kind(&self) -> HandleKind {
        HandleKind::ContainerInstance
    }

    async fn provision(&self, user: &UserId) -> Result<Provisioned<ContainerBacking>, ProvisionError> {
        let port = self.ports.allocate()?;
        debug!(user = %user, port, "Allocated port");

        let result = self.provision_on_port(user, port).await;
        if result.is_err() {
            self.ports.release(port);
        }
        result
    }

    async fn teardown(&self, user: &UserId, backing: &ContainerBacking) -> Result<(), ProvisionError> {
        let result = self
            .runtime
            .stop_and_remove(&backing.container_id, self.config.stop_grace)
            .await;

        // Released after the removal attempt, whether or not it succeeded
        self.ports.release(backing.port);
        debug!(user = %user, container = %backing.container_name, port = backing.port, "Released port");

        result.map_err(ProvisionError::from)
    }
}

impl<R: ContainerRuntime> PoolManager<ContainerProvisioner<R>> {
    /// Manager for per-user containers. Sweeps orphans first when configured.
    pub async fn containers(runtime: R, config: ContainerPoolConfig) -> Result<Self, ProvisionError> {
        let capacity = config.max_containers;
        let reap = config.reap_settings();
        let sweep = config.sweep_orphans_on_start;

        let provisioner = ContainerProvisioner::new(runtime, config)?;
        if sweep {
            let removed = provisioner.sweep_orphans().await?;
            if removed > 0 {
                info!(removed, "Swept orphaned containers");
            }
        }

        Ok(Self::new(provisioner, capacity, reap))
    }
}
