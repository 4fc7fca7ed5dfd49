// ABOUTME: Tunables for the connection and container pools
//
// Two sections, one per backend kind:
// - ConnectionPoolConfig: shared MCP endpoint, request timeout, capacity, reaping
// - ContainerPoolConfig: image and limits, port window, data root, readiness, reaping
//
// Durations are plain integers on disk (seconds, or milliseconds where noted).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// === Idle Reaping ===

/// Settings shared by both pools' background reaper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub idle_threshold: Duration,
}

// === Logical Connections ===

/// Pool of per-user logical connections to one shared MCP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Base URL of the shared MCP endpoint
    pub base_url: String,

    /// Per-request timeout applied to every call
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Maximum resident connections
    pub max_connections: usize,

    /// Run the idle reaper
    pub reaper_enabled: bool,

    /// Time between reaper ticks
    #[serde(with = "duration_secs")]
    pub reap_interval: Duration,

    /// Connections unused for longer than this are reaped
    #[serde(with = "duration_secs")]
    pub idle_threshold: Duration,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:18060/mcp".to_string(),
            request_timeout: Duration::from_secs(30),
            max_connections: 100,
            reaper_enabled: true,
            reap_interval: Duration::from_secs(300), // 5 minutes
            idle_threshold: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl ConnectionPoolConfig {
    pub const fn reap_settings(&self) -> ReapSettings {
        ReapSettings {
            enabled: self.reaper_enabled,
            interval: self.reap_interval,
            idle_threshold: self.idle_threshold,
        }
    }
}

// === Containers ===

/// Restart policy applied to each per-user container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    OnFailure,
    UnlessStopped,
    Always,
}

/// Pool of per-user containers, each running a private MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerPoolConfig {
    /// Image providing the MCP server
    pub image: String,

    /// Container names are `<service_name>-<user>`
    pub service_name: String,

    /// Port the MCP server listens on inside the container
    pub container_port: u16,

    /// Host used to reach published ports
    pub endpoint_host: String,

    /// HTTP path of the MCP endpoint inside the container
    pub mcp_path: String,

    // === Port Window ===
    /// First host port handed out
    pub base_port: u16,

    /// Number of host ports in the window
    pub port_range: u32,

    // === Data ===
    /// Root of per-user data directories
    pub data_root: PathBuf,

    /// Subdirectory under the root, one per backend kind
    pub data_kind: String,

    /// Mount point of the user's data directory in the container
    pub container_data_path: String,

    // === Limits ===
    /// Memory limit in megabytes
    pub memory_limit_mb: u64,

    /// CPU share (fraction of one core)
    pub cpu_limit: f64,

    pub restart_policy: RestartPolicy,

    /// Maximum resident containers
    pub max_containers: usize,

    /// Per-request timeout applied to every call
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Grace period given to `docker stop` before the container is killed
    #[serde(with = "duration_secs")]
    pub stop_grace: Duration,

    // === Readiness ===
    /// Longest wait for a started container to answer `ping`
    #[serde(with = "duration_secs")]
    pub readiness_timeout: Duration,

    /// First delay between readiness probes (milliseconds, doubles per retry)
    #[serde(with = "duration_millis")]
    pub readiness_poll_interval: Duration,

    // === Housekeeping ===
    /// Pull the image when it is missing locally
    pub pull_image: bool,

    /// Remove leftover managed containers when the pool starts
    pub sweep_orphans_on_start: bool,

    pub reaper_enabled: bool,

    #[serde(with = "duration_secs")]
    pub reap_interval: Duration,

    #[serde(with = "duration_secs")]
    pub idle_threshold: Duration,
}

impl Default for ContainerPoolConfig {
    fn default() -> Self {
        Self {
            image: "xpzouying/xiaohongshu-mcp:latest".to_string(),
            service_name: "xiaohongshu-mcp".to_string(),
            container_port: 18060,
            endpoint_host: "localhost".to_string(),
            mcp_path: "/mcp".to_string(),

            base_port: 18060,
            port_range: 1000,

            data_root: PathBuf::from("./data"),
            data_kind: "mcp".to_string(),
            container_data_path: "/data".to_string(),

            memory_limit_mb: 256,
            cpu_limit: 0.1,
            restart_policy: RestartPolicy::OnFailure,
            max_containers: 20,
            request_timeout: Duration::from_secs(60),
            stop_grace: Duration::from_secs(10),

            readiness_timeout: Duration::from_secs(30),
            readiness_poll_interval: Duration::from_millis(200),

            pull_image: true,
            sweep_orphans_on_start: true,
            reaper_enabled: true,
            reap_interval: Duration::from_secs(300), // 5 minutes
            idle_threshold: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl ContainerPoolConfig {
    pub const fn reap_settings(&self) -> ReapSettings {
        ReapSettings {
            enabled: self.reaper_enabled,
            interval: self.reap_interval,
            idle_threshold: self.idle_threshold,
        }
    }

    /// Host directory mounted into `user`'s container.
    ///
    /// Relative roots are resolved against the current directory, since Docker
    /// only accepts absolute bind sources.
    pub fn user_data_dir(&self, user: &str) -> std::io::Result<PathBuf> {
        let root = absolute(&self.data_root)?;
        Ok(root.join(&self.data_kind).join(user))
    }

    pub fn container_name(&self, user: &str) -> String {
        format!("{}-{}", self.service_name, user)
    }

    /// Endpoint of the MCP server published on `port`
    pub fn endpoint(&self, port: u16) -> String {
        format!("http://{}:{}{}", self.endpoint_host, port, self.mcp_path)
    }
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Serde helper for Duration as seconds (u64)
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for Duration as milliseconds (u64)
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
