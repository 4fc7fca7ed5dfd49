// ABOUTME: Facade handed to request-handling code: one pool plus its idle reaper
// ABOUTME: Maps provisioning failures and call failures to distinct caller-facing outcomes

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::config::ReapSettings;
use super::handle::{HandleSnapshot, ResourceHandle, UserId};
use super::metrics::MetricsSnapshot;
use super::pool::{PoolStats, ResourcePool};
use super::provisioner::{ProvisionError, Provisioner};
use super::reaper::IdleReaper;
use crate::mcp::{CallError, ToolArguments, ToolInfo};

/// How a failure should be reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No backend could be provided for the user
    ServiceUnavailable,
    /// The call failed; the user's backend is still resident
    RequestFailed,
    /// The caller or the gateway gave up on the call
    Cancelled,
}

/// Errors returned by manager calls
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Call(#[from] CallError),
}

impl GatewayError {
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Provision(_) => FailureKind::ServiceUnavailable,
            Self::Call(CallError::Cancelled) => FailureKind::Cancelled,
            Self::Call(_) => FailureKind::RequestFailed,
        }
    }
}

/// Owns one pool and the reaper that sweeps it.
pub struct PoolManager<P: Provisioner> {
    pool: Arc<ResourcePool<P>>,
    reaper: tokio::sync::Mutex<IdleReaper>,
    reap: ReapSettings,
}

impl<P: Provisioner> PoolManager<P> {
    pub fn new(provisioner: P, capacity: usize, reap: ReapSettings) -> Self {
        Self {
            pool: Arc::new(ResourcePool::new(provisioner, capacity)),
            reaper: tokio::sync::Mutex::new(IdleReaper::new(reap.interval, reap.idle_threshold)),
            reap,
        }
    }

    /// Start background reaping, if enabled.
    pub async fn start(&self) {
        if self.reap.enabled {
            self.reaper.lock().await.start(Arc::clone(&self.pool));
        }
        info!(
            kind = self.pool.provisioner().kind().as_str(),
            capacity = self.pool.capacity(),
            reaper = self.reap.enabled,
            "Pool manager started"
        );
    }

    pub fn pool(&self) -> &Arc<ResourcePool<P>> {
        &self.pool
    }

    pub async fn acquire(&self, user: &UserId) -> Result<Arc<ResourceHandle<P::Backing>>, ProvisionError> {
        self.pool.acquire(user).await
    }

    /// Tear down `user`'s backend early. False if none was resident.
    pub async fn release(&self, user: &UserId) -> bool {
        self.pool.remove(user).await
    }

    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    pub async fn snapshot(&self) -> Vec<HandleSnapshot> {
        self.pool.snapshot().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pool.metrics().snapshot()
    }

    pub async fn list_tools(&self, user: &UserId, cancel: &CancellationToken) -> Result<Vec<ToolInfo>, GatewayError> {
        self.call(user, cancel, |handle, token| async move { handle.list_tools(&token).await })
            .await
    }

    pub async fn call_tool(
        &self,
        user: &UserId,
        name: &str,
        arguments: ToolArguments,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        self.call(user, cancel, |handle, token| async move {
            handle.call_tool(name, arguments, &token).await
        })
        .await
    }

    pub async fn ping(&self, user: &UserId, cancel: &CancellationToken) -> Result<(), GatewayError> {
        self.call(user, cancel, |handle, token| async move { handle.ping(&token).await })
            .await
    }

    /// Stop the reaper, cancel in-flight calls, then tear everything down.
    pub async fn shutdown(&self) {
        self.reaper.lock().await.stop().await;
        self.pool.close().await;
        info!("Pool manager shut down");
    }

    /// Acquire `user`'s handle and run one exchange on it.
    ///
    /// The exchange sees a token cancelled by either the caller or pool
    /// shutdown. Acquisition itself is not cancellable, so a half-provisioned
    /// backend is never abandoned.
    async fn call<T, F, Fut>(&self, user: &UserId, cancel: &CancellationToken, exchange: F) -> Result<T, GatewayError>
    where
        F: FnOnce(Arc<ResourceHandle<P::Backing>>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let handle = self.pool.acquire(user).await?;

        let token = self.pool.closing().child_token();
        let call = exchange(handle, token.clone());
        tokio::pin!(call);

        let outcome = tokio::select! {
            biased;
            result = &mut call => result,
            () = cancel.cancelled() => {
                token.cancel();
                call.await
            }
        };

        if let Err(e) = &outcome {
            if e.marks_handle() {
                self.pool.metrics().record_call_error();
            }
        }
        outcome.map_err(GatewayError::from)
    }
}
