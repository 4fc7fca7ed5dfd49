// ABOUTME: Docker integration for running per-user MCP server containers

pub mod container_manager;
pub mod mcp_container;

pub use container_manager::{ContainerError, ContainerManager, ContainerRuntime, ManagedContainer};
pub use mcp_container::{McpContainerSpec, MANAGED_LABEL, SERVICE_LABEL, USER_LABEL};

#[cfg(test)]
pub use container_manager::MockContainerRuntime;
