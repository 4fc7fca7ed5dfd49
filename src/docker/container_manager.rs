// ABOUTME: Docker container lifecycle for per-user MCP servers using Bollard
// ABOUTME: ContainerRuntime is the seam the container provisioner talks to

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, ListContainersOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::ContainerSummary;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::mcp_container::{McpContainerSpec, MANAGED_LABEL, SERVICE_LABEL, USER_LABEL};
use crate::config::DockerConfig;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Docker connection error: {0}")]
    Connection(#[from] bollard::errors::Error),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Container operation failed: {0}")]
    OperationFailed(String),
}

/// A gateway-created container found on the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub user: Option<String>,
}

/// Container operations needed to run per-user MCP servers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Make sure `image` is present locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError>;

    /// Force-remove any container named `name`. Returns true if one existed.
    async fn remove_by_name(&self, name: &str) -> Result<bool, ContainerError>;

    /// Create (but don't start) a container; returns its id.
    async fn create(&self, spec: &McpContainerSpec) -> Result<String, ContainerError>;

    async fn start(&self, container_id: &str) -> Result<(), ContainerError>;

    /// Stop within `grace`, then force-remove. An already-gone container is not an error.
    async fn stop_and_remove(&self, container_id: &str, grace: Duration) -> Result<(), ContainerError>;

    /// Containers carrying the management labels for `service`.
    async fn list_managed(&self, service: &str) -> Result<Vec<ManagedContainer>, ContainerError>;
}

/// How a configured Docker host string should be dialled
#[derive(Debug, Clone, PartialEq, Eq)]
enum DockerEndpoint {
    Unix(String),
    Http(String),
    Default,
}

impl DockerEndpoint {
    fn parse(host: &str) -> Self {
        if let Some(path) = host.strip_prefix("unix://") {
            Self::Unix(path.to_string())
        } else if let Some(addr) = host.strip_prefix("tcp://") {
            Self::Http(format!("http://{addr}"))
        } else if host.starts_with("http://") {
            Self::Http(host.to_string())
        } else {
            Self::Default
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerManager {
    docker: Docker,
}

impl ContainerManager {
    /// Connect to the daemon and verify it answers within the configured timeout.
    pub async fn connect(config: &DockerConfig) -> Result<Self, ContainerError> {
        let docker = Self::connect_to_docker(config.host.as_deref(), config.timeout)?;

        let ping_timeout = Duration::from_secs(config.timeout);
        tokio::time::timeout(ping_timeout, docker.ping())
            .await
            .map_err(|_| {
                ContainerError::Connection(bollard::errors::Error::DockerResponseServerError {
                    status_code: 408,
                    message: "Docker ping timeout - daemon may be unresponsive".to_string(),
                })
            })??;

        info!("Successfully connected to Docker daemon");
        Ok(Self { docker })
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    fn connect_to_docker(host: Option<&str>, timeout: u64) -> Result<Docker, bollard::errors::Error> {
        // Explicit configuration first
        if let Some(host) = host {
            info!("Using Docker host from config: {}", host);
            return Self::connect_to_endpoint(DockerEndpoint::parse(host), timeout);
        }

        if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            info!("Using DOCKER_HOST: {}", docker_host);
            return Docker::connect_with_local_defaults();
        }

        for socket_path in Self::get_docker_socket_paths() {
            if !std::path::Path::new(&socket_path).exists() {
                continue;
            }
            info!("Found Docker socket at: {}", socket_path);
            match Self::connect_to_endpoint(DockerEndpoint::Unix(socket_path.clone()), timeout) {
                Ok(docker) => return Ok(docker),
                Err(e) => warn!("Failed to connect to Docker socket {}: {}", socket_path, e),
            }
        }

        warn!("No Docker socket found, trying default connection");
        Docker::connect_with_local_defaults()
    }

    fn connect_to_endpoint(endpoint: DockerEndpoint, timeout: u64) -> Result<Docker, bollard::errors::Error> {
        match endpoint {
            #[cfg(unix)]
            DockerEndpoint::Unix(path) => Docker::connect_with_unix(&path, timeout, API_DEFAULT_VERSION),
            DockerEndpoint::Http(addr) => Docker::connect_with_http(&addr, timeout, API_DEFAULT_VERSION),
            _ => Docker::connect_with_local_defaults(),
        }
    }

    fn get_docker_socket_paths() -> Vec<String> {
        let mut paths = Vec::new();

        if cfg!(target_os = "linux") {
            paths.push("/var/run/docker.sock".to_string());

            // Rootless Docker and Podman
            if let Ok(xdg_runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                paths.push(format!("{xdg_runtime_dir}/docker.sock"));
                paths.push(format!("{xdg_runtime_dir}/podman/podman.sock"));
            }
        }

        if cfg!(target_os = "macos") {
            if let Some(home) = dirs::home_dir() {
                let home = home.to_string_lossy();
                paths.push(format!("{home}/.docker/run/docker.sock"));
                paths.push(format!("{home}/.colima/default/docker.sock"));
            }
            paths.push("/var/run/docker.sock".to_string());
        }

        paths
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), ContainerError> {
        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(container_id, Some(remove_options)).await {
            Ok(()) => {
                info!("Successfully removed container {}", container_id);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} was already removed", container_id);
                Ok(())
            }
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    async fn list_with_filters(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        Ok(self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?)
    }
}

/// Ids of the containers whose name is exactly `name`.
fn exact_name_matches(containers: Vec<ContainerSummary>, name: &str) -> Vec<String> {
    containers
        .into_iter()
        .filter(|summary| {
            summary
                .names
                .iter()
                .flatten()
                .any(|candidate| candidate.trim_start_matches('/') == name)
        })
        .filter_map(|summary| summary.id)
        .collect()
}

#[async_trait]
impl ContainerRuntime for ContainerManager {
    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                filters: HashMap::from([("reference".to_string(), vec![image.to_string()])]),
                ..Default::default()
            }))
            .await?;

        if !images.is_empty() {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        info!("Pulling image {}", image);
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                error!("Failed to pull image {}: {}", image, e);
                return Err(ContainerError::OperationFailed(format!("Failed to pull image {image}: {e}")));
            }
        }

        info!("Successfully pulled image {}", image);
        Ok(())
    }

    async fn remove_by_name(&self, name: &str) -> Result<bool, ContainerError> {
        // Docker's name filter is a regex over "/<name>"; it can over-match
        let candidates = self
            .list_with_filters(HashMap::from([("name".to_string(), vec![format!("^/{name}$")])]))
            .await?;

        let ids = exact_name_matches(candidates, name);
        for id in &ids {
            self.remove_container(id).await?;
        }
        Ok(!ids.is_empty())
    }

    async fn create(&self, spec: &McpContainerSpec) -> Result<String, ContainerError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), spec.to_container_config())
            .await?;

        for warning in &response.warnings {
            warn!(container = %spec.name, "Docker warning: {}", warning);
        }
        info!("Created container {} with ID {}", spec.name, response.id);
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        info!("Started container {}", container_id);
        Ok(())
    }

    async fn stop_and_remove(&self, container_id: &str, grace: Duration) -> Result<(), ContainerError> {
        let stop_options = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };

        match self.docker.stop_container(container_id, Some(stop_options)).await {
            Ok(()) => debug!("Stopped container {}", container_id),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => debug!("Container {} was already stopped", container_id),
            // Force-remove below still cleans it up
            Err(e) => warn!("Failed to stop container {}: {}", container_id, e),
        }

        self.remove_container(container_id).await
    }

    async fn list_managed(&self, service: &str) -> Result<Vec<ManagedContainer>, ContainerError> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{MANAGED_LABEL}=true"), format!("{SERVICE_LABEL}={service}")],
        )]);

        let containers = self.list_with_filters(filters).await?;
        Ok(containers
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let name = summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                let user = summary.labels.and_then(|mut labels| labels.remove(USER_LABEL));
                Some(ManagedContainer { id, name, user })
            })
            .collect())
    }
}
