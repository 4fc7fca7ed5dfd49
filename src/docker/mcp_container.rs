// ABOUTME: Description of one per-user MCP container and its translation to a Docker create request

use std::collections::HashMap;
use std::path::PathBuf;

use bollard::container::Config;
use bollard::models::{
    HostConfig, Mount, MountTypeEnum, PortBinding, RestartPolicy as DockerRestartPolicy,
    RestartPolicyNameEnum,
};

use crate::mcp_pool::config::{ContainerPoolConfig, RestartPolicy};

/// Present on every container the gateway creates
pub const MANAGED_LABEL: &str = "mcp-gateway.managed";
/// Service name the container belongs to
pub const SERVICE_LABEL: &str = "mcp-gateway.service";
/// User the container serves
pub const USER_LABEL: &str = "mcp-gateway.user";

/// Everything needed to create one user's container
#[derive(Debug, Clone, PartialEq)]
pub struct McpContainerSpec {
    pub name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    /// Absolute host path bound into the container
    pub data_dir: PathBuf,
    pub container_data_path: String,
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub restart_policy: RestartPolicy,
    pub env: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
}

impl McpContainerSpec {
    pub fn for_user(config: &ContainerPoolConfig, user: &str, host_port: u16, data_dir: PathBuf) -> Self {
        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (SERVICE_LABEL.to_string(), config.service_name.clone()),
            (USER_LABEL.to_string(), user.to_string()),
        ]);

        Self {
            name: config.container_name(user),
            image: config.image.clone(),
            host_port,
            container_port: config.container_port,
            data_dir,
            container_data_path: config.container_data_path.clone(),
            memory_limit_mb: config.memory_limit_mb,
            cpu_limit: config.cpu_limit,
            restart_policy: config.restart_policy,
            env: vec![("USER_ID".to_string(), user.to_string())],
            labels,
        }
    }

    fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }

    /// Build the Docker create request.
    ///
    /// The port is published on loopback only; the gateway is the sole client.
    pub fn to_container_config(&self) -> Config<String> {
        let port_bindings = HashMap::from([(
            self.port_key(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(self.host_port.to_string()),
            }]),
        )]);

        let mounts = vec![Mount {
            target: Some(self.container_data_path.clone()),
            source: Some(self.data_dir.to_string_lossy().to_string()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(false),
            ..Default::default()
        }];

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            mounts: Some(mounts),
            memory: Some((self.memory_limit_mb * 1024 * 1024) as i64),
            nano_cpus: Some((self.cpu_limit * 1_000_000_000.0).round() as i64),
            restart_policy: Some(DockerRestartPolicy {
                name: Some(restart_policy_name(self.restart_policy)),
                maximum_retry_count: None,
            }),
            auto_remove: Some(false), // lifecycle is managed by the pool
            ..Default::default()
        };

        let env = self.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        Config {
            image: Some(self.image.clone()),
            env: Some(env),
            exposed_ports: Some(HashMap::from([(self.port_key(), HashMap::new())])),
            labels: Some(self.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

const fn restart_policy_name(policy: RestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
    }
}
