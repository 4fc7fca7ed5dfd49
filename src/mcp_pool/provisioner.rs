// ABOUTME: Strategy seam between the generic pool and a concrete backend kind
// ABOUTME: Provisioners create a user's backend on acquire and tear it down on removal

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::handle::{Backing, HandleKind, UserId};
use super::port_allocator::PortError;
use crate::docker::ContainerError;
use crate::mcp::McpClient;

/// Errors raised while creating or destroying a backend
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Port allocation failed: {0}")]
    PortsExhausted(#[from] PortError),

    #[error("Container runtime error: {0}")]
    Container(#[from] ContainerError),

    #[error("Backend at {endpoint} not ready after {waited:?}")]
    ReadinessTimeout { endpoint: String, waited: Duration },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("User id not usable as a routing header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Failed to prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pool has no capacity")]
    NoCapacity,

    #[error("Pool is shutting down")]
    ShuttingDown,
}

/// A freshly created backend, ready to be wrapped in a handle
#[derive(Debug)]
pub struct Provisioned<B> {
    pub client: McpClient,
    pub backing: B,
}

/// Creates and destroys one kind of per-user backend.
///
/// The pool calls `provision` without holding its registry lock and calls
/// `teardown` exactly once for every backend it provisioned.
#[async_trait]
pub trait Provisioner: Send + Sync + 'static {
    type Backing: Backing;

    fn kind(&self) -> HandleKind;

    async fn provision(&self, user: &UserId) -> Result<Provisioned<Self::Backing>, ProvisionError>;

    /// Release everything `provision` acquired. Must tolerate an already-gone backend.
    async fn teardown(&self, user: &UserId, backing: &Self::Backing) -> Result<(), ProvisionError>;
}
