// ABOUTME: Bounded per-user pool of MCP backends with LRU eviction and idle reaping
//
// Every user gets at most one resident backend, either a logical HTTP
// connection to a shared MCP endpoint or a dedicated Docker container.
//
// Key components:
// - handle: user ids and the pooled handle wrapping one backend
// - provisioner: how a backend is created and torn down
// - pool: bounded registry with per-user serialization and LRU eviction
// - reaper: background removal of idle handles
// - port_allocator: host ports for container backends
// - connection / container: the two provisioners
// - manager: facade combining a pool with its reaper

pub mod config;
pub mod connection;
pub mod container;
pub mod handle;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod port_allocator;
pub mod provisioner;
pub mod reaper;

// Re-exports for convenient access
pub use config::{ConnectionPoolConfig, ContainerPoolConfig, ReapSettings, RestartPolicy};
pub use connection::{ConnectionBacking, ConnectionProvisioner, USER_ID_HEADER};
pub use container::{ContainerBacking, ContainerProvisioner};
pub use handle::{
    Backing, HandleId, HandleKind, HandleSnapshot, HandleStatus, InvalidUserId, ResourceHandle, UserId,
};
pub use manager::{FailureKind, GatewayError, PoolManager};
pub use metrics::{MetricsSnapshot, PoolMetrics};
pub use pool::{PoolStats, RemovalReason, ResourcePool};
pub use port_allocator::{PortAllocator, PortError};
pub use provisioner::{ProvisionError, Provisioned, Provisioner};
pub use reaper::IdleReaper;
