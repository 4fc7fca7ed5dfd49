// ABOUTME: Configuration management for mcp-gateway
// Loads a TOML file from the first known location, applies environment overrides, then validates

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::mcp_pool::config::{ConnectionPoolConfig, ContainerPoolConfig};

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Per-user logical connections to a shared endpoint
    pub connection: ConnectionPoolConfig,

    /// Per-user MCP containers
    pub container: ContainerPoolConfig,

    /// Docker daemon connection
    pub docker: DockerConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker host connection string
    /// Examples:
    /// - unix:///var/run/docker.sock
    /// - tcp://localhost:2376
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_docker_timeout")]
    pub timeout: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout: default_docker_timeout(),
        }
    }
}

const fn default_docker_timeout() -> u64 {
    60
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,

    pub format: LogFormat,

    /// Also write JSON logs to a timestamped file in this directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

impl GatewayConfig {
    /// Load from `explicit` if given, else from the first default location
    /// that exists, then apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                ensure!(path.exists(), "Config file {} does not exist", path.display());
                Some(path.to_path_buf())
            }
            None => Self::get_config_paths().into_iter().find(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get configuration file paths in order of precedence
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        // 1. Working directory
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join("mcp-gateway.toml"));
        }

        // 2. User config (~/.mcp-gateway/config.toml)
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".mcp-gateway").join("config.toml"));
        }

        // 3. System config
        paths.push(PathBuf::from("/etc/mcp-gateway/config.toml"));

        paths
    }

    /// Override fields from environment variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MCP_GATEWAY_BASE_URL") {
            self.connection.base_url = url;
        }
        if let Some(value) = lookup("MCP_GATEWAY_MAX_CONNECTIONS") {
            self.connection.max_connections = parse_env("MCP_GATEWAY_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("MCP_GATEWAY_MAX_CONTAINERS") {
            self.container.max_containers = parse_env("MCP_GATEWAY_MAX_CONTAINERS", &value)?;
        }
        if let Some(value) = lookup("MCP_GATEWAY_BASE_PORT") {
            self.container.base_port = parse_env("MCP_GATEWAY_BASE_PORT", &value)?;
        }
        if let Some(image) = lookup("MCP_GATEWAY_IMAGE") {
            self.container.image = image;
        }
        if let Some(root) = lookup("MCP_GATEWAY_DATA_ROOT") {
            self.container.data_root = PathBuf::from(root);
        }
        if let Some(level) = lookup("MCP_GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(host) = lookup("DOCKER_HOST") {
            self.docker.host = Some(host);
        }
        Ok(())
    }

    /// Reject settings the pools cannot run with.
    pub fn validate(&self) -> Result<()> {
        let connection = &self.connection;
        let url = url::Url::parse(&connection.base_url)
            .with_context(|| format!("Invalid connection.base_url {:?}", connection.base_url))?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            "connection.base_url must be http or https, got {}",
            url.scheme()
        );
        ensure!(connection.max_connections > 0, "connection.max_connections must be positive");
        ensure!(
            !connection.reaper_enabled || !connection.reap_interval.is_zero(),
            "connection.reap_interval must be positive"
        );

        let container = &self.container;
        ensure!(!container.image.trim().is_empty(), "container.image must not be empty");
        validate_service_name(&container.service_name)?;
        ensure!(container.max_containers > 0, "container.max_containers must be positive");
        ensure!(container.port_range > 0, "container.port_range must be positive");
        ensure!(
            u32::from(container.base_port) + container.port_range <= u32::from(u16::MAX) + 1,
            "container port window {}+{} runs past 65535",
            container.base_port,
            container.port_range
        );
        ensure!(
            container.max_containers <= container.port_range as usize,
            "container.max_containers ({}) exceeds container.port_range ({})",
            container.max_containers,
            container.port_range
        );
        ensure!(
            container.cpu_limit.is_finite() && container.cpu_limit > 0.0,
            "container.cpu_limit must be positive"
        );
        ensure!(container.memory_limit_mb > 0, "container.memory_limit_mb must be positive");
        ensure!(
            container.mcp_path.starts_with('/'),
            "container.mcp_path must start with '/'"
        );
        ensure!(!container.data_kind.is_empty(), "container.data_kind must not be empty");
        ensure!(
            !container.readiness_poll_interval.is_zero(),
            "container.readiness_poll_interval must be positive"
        );
        ensure!(
            !container.reaper_enabled || !container.reap_interval.is_zero(),
            "container.reap_interval must be positive"
        );

        Ok(())
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value {value:?} for {key}"))
}

/// Service names prefix container names, so they follow Docker's name rules.
fn validate_service_name(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        bail!("container.service_name must not be empty");
    };
    ensure!(
        first.is_ascii_alphanumeric(),
        "container.service_name must start with a letter or digit"
    );
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        bail!("container.service_name contains unsupported character {bad:?}");
    }
    Ok(())
}
