// ABOUTME: Bounded per-user registry of MCP backends with LRU eviction and get-or-create
// ABOUTME: One generic pool serves both logical connections and containers via a Provisioner

//! Resource pool.
//!
//! Locks, outermost first:
//! - a per-user async gate, held across provisioning and destruction for that
//!   user so a backend is never resurrected while it is being torn down;
//! - the registry `RwLock`, held only for lookups and map mutation, never
//!   across provisioning or teardown;
//! - each handle's own state lock (see `handle.rs`).
//!
//! Capacity is a semaphore. Every resident handle and every in-flight
//! provisioning owns one permit, so the registry can never outgrow it.
//! Eviction only ever try-locks another user's gate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, RwLock, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handle::{HandleId, HandleSnapshot, HandleStatus, ResourceHandle, UserId};
use super::metrics::PoolMetrics;
use super::provisioner::{ProvisionError, Provisioner};

/// How long a full pool waits before re-scanning for an evictable handle.
const EVICTION_RETRY: Duration = Duration::from_millis(50);

/// Advisory counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub error: usize,
    pub capacity: usize,
}

/// Why a handle left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Released,
    Evicted,
    Idle,
    Shutdown,
}

impl RemovalReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::Evicted => "evicted",
            Self::Idle => "idle",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Condition re-checked under the registry write lock before a handle is destroyed
#[derive(Debug, Clone, Copy)]
enum Expect {
    Any,
    IdleBefore(Instant),
    Unchanged { id: HandleId, last_used: Instant },
}

impl Expect {
    fn holds<B: super::handle::Backing>(self, handle: &ResourceHandle<B>) -> bool {
        match self {
            Self::Any => true,
            Self::IdleBefore(cutoff) => handle.last_used() < cutoff,
            Self::Unchanged { id, last_used } => handle.id() == id && handle.last_used() <= last_used,
        }
    }
}

struct Resident<B> {
    handle: Arc<ResourceHandle<B>>,
    _slot: OwnedSemaphorePermit,
}

// === Per-user Gates ===

#[derive(Default)]
struct Gates {
    inner: parking_lot::Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

struct GateGuard<'a> {
    gates: &'a Gates,
    user: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Gates {
    fn entry(&self, user: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.inner.lock().entry(user.clone()).or_default())
    }

    async fn lock(&self, user: &UserId) -> GateGuard<'_> {
        let guard = self.entry(user).lock_owned().await;
        GateGuard {
            gates: self,
            user: user.clone(),
            guard: Some(guard),
        }
    }

    fn try_lock(&self, user: &UserId) -> Option<GateGuard<'_>> {
        let guard = self.entry(user).try_lock_owned().ok();
        if guard.is_none() {
            self.prune(user);
        }
        guard.map(|guard| GateGuard {
            gates: self,
            user: user.clone(),
            guard: Some(guard),
        })
    }

    /// Drop the gate once nobody holds or waits on it.
    fn prune(&self, user: &UserId) {
        let mut gates = self.inner.lock();
        if gates.get(user).is_some_and(|gate| Arc::strong_count(gate) == 1) {
            gates.remove(user);
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.gates.prune(&self.user);
    }
}

// === Pool ===

/// Bounded keyed registry of per-user handles.
pub struct ResourcePool<P: Provisioner> {
    provisioner: P,
    capacity: usize,
    registry: RwLock<HashMap<UserId, Resident<P::Backing>>>,
    gates: Gates,
    slots: Arc<Semaphore>,
    closing: CancellationToken,
    metrics: Arc<PoolMetrics>,
}

impl<P: Provisioner> ResourcePool<P> {
    /// Create an empty pool holding at most `capacity` handles.
    pub fn new(provisioner: P, capacity: usize) -> Self {
        Self::with_metrics(provisioner, capacity, Arc::new(PoolMetrics::new()))
    }

    pub fn with_metrics(provisioner: P, capacity: usize, metrics: Arc<PoolMetrics>) -> Self {
        Self {
            provisioner,
            capacity,
            registry: RwLock::new(HashMap::new()),
            gates: Gates::default(),
            slots: Arc::new(Semaphore::new(capacity)),
            closing: CancellationToken::new(),
            metrics,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub const fn provisioner(&self) -> &P {
        &self.provisioner
    }

    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    /// Token cancelled when the pool starts closing.
    pub fn closing(&self) -> &CancellationToken {
        &self.closing
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    pub async fn size(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn contains(&self, user: &UserId) -> bool {
        self.registry.read().await.contains_key(user)
    }

    /// Return `user`'s resident handle, provisioning one if needed.
    pub async fn acquire(&self, user: &UserId) -> Result<Arc<ResourceHandle<P::Backing>>, ProvisionError> {
        if self.is_closed() {
            return Err(ProvisionError::ShuttingDown);
        }

        if let Some(handle) = self.reuse(user).await {
            return Ok(handle);
        }

        if self.capacity == 0 {
            return Err(ProvisionError::NoCapacity);
        }

        let _gate = self.gates.lock(user).await;
        if self.is_closed() {
            return Err(ProvisionError::ShuttingDown);
        }

        // Another task may have provisioned while we waited on the gate
        if let Some(handle) = self.reuse(user).await {
            return Ok(handle);
        }

        let slot = self.reserve_slot(user).await?;

        debug!(user = %user, kind = self.provisioner.kind().as_str(), "Provisioning backend");
        let provisioned = match self.provisioner.provision(user).await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                self.metrics.record_provision_failure();
                warn!(user = %user, error = %e, "Provisioning failed");
                return Err(e);
            }
        };

        let handle = Arc::new(ResourceHandle::new(
            user.clone(),
            self.provisioner.kind(),
            provisioned.client,
            provisioned.backing,
        ));

        let mut registry = self.registry.write().await;

        if self.is_closed() {
            drop(registry);
            self.discard(&handle, RemovalReason::Shutdown).await;
            return Err(ProvisionError::ShuttingDown);
        }

        if let Some(existing) = registry.get(user) {
            let existing = Arc::clone(&existing.handle);
            drop(registry);
            warn!(user = %user, "Discarding redundant backend");
            self.discard(&handle, RemovalReason::Released).await;
            existing.touch();
            self.metrics.record_acquire(true);
            return Ok(existing);
        }

        registry.insert(
            user.clone(),
            Resident {
                handle: Arc::clone(&handle),
                _slot: slot,
            },
        );
        self.metrics.set_resident(registry.len());
        drop(registry);

        self.metrics.record_provision();
        self.metrics.record_acquire(false);
        info!(
            user = %user,
            handle = %handle.id(),
            endpoint = %handle.endpoint(),
            "Provisioned backend"
        );
        Ok(handle)
    }

    /// Tear down `user`'s handle. Returns false when nothing was resident.
    pub async fn remove(&self, user: &UserId) -> bool {
        let _gate = self.gates.lock(user).await;
        let removed = self.destroy_locked(user, Expect::Any, RemovalReason::Released).await;
        if removed {
            self.metrics.record_release();
        }
        removed
    }

    pub async fn stats(&self) -> PoolStats {
        let registry = self.registry.read().await;
        let mut stats = PoolStats {
            total: registry.len(),
            capacity: self.capacity,
            ..PoolStats::default()
        };
        for resident in registry.values() {
            match resident.handle.status() {
                HandleStatus::Active => stats.active += 1,
                HandleStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    /// Per-handle view, least recently used first.
    pub async fn snapshot(&self) -> Vec<HandleSnapshot> {
        let mut handles: Vec<HandleSnapshot> = self
            .registry
            .read()
            .await
            .values()
            .map(|resident| resident.handle.snapshot())
            .collect();
        handles.sort_by(|a, b| b.idle_for.cmp(&a.idle_for).then_with(|| a.user_id.cmp(&b.user_id)));
        handles
    }

    /// Destroy every handle last used before `cutoff`.
    ///
    /// Candidates are collected under the read lock; each is then destroyed
    /// under its own gate after re-checking that it was not used since.
    pub async fn reap_idle_before(&self, cutoff: Instant) -> usize {
        let candidates: Vec<UserId> = {
            let registry = self.registry.read().await;
            registry
                .iter()
                .filter(|(_, resident)| resident.handle.last_used() < cutoff)
                .map(|(user, _)| user.clone())
                .collect()
        };

        let mut reaped = 0;
        for user in candidates {
            let _gate = self.gates.lock(&user).await;
            if self.destroy_locked(&user, Expect::IdleBefore(cutoff), RemovalReason::Idle).await {
                reaped += 1;
            }
        }

        if reaped > 0 {
            self.metrics.record_reaped(reaped);
        }
        reaped
    }

    /// Refuse new acquires and tear down every resident handle.
    pub async fn close(&self) {
        if self.closing.is_cancelled() && self.size().await == 0 {
            return;
        }
        self.closing.cancel();

        let drained: Vec<Resident<P::Backing>> = {
            let mut registry = self.registry.write().await;
            let drained = registry.drain().map(|(_, resident)| resident).collect();
            self.metrics.set_resident(0);
            drained
        };

        info!(count = drained.len(), "Closing pool");
        join_all(
            drained
                .into_iter()
                .map(|resident| self.teardown(resident, RemovalReason::Shutdown)),
        )
        .await;
        self.slots.close();
    }

    // === Internals ===

    async fn reuse(&self, user: &UserId) -> Option<Arc<ResourceHandle<P::Backing>>> {
        // Touch under the read lock so a reaper or evictor re-validating under the
        // write lock sees the new recency
        let registry = self.registry.read().await;
        let handle = Arc::clone(&registry.get(user)?.handle);
        handle.touch();
        drop(registry);
        self.metrics.record_acquire(true);
        Some(handle)
    }

    /// Get a capacity slot, evicting the least recently used handle if full.
    async fn reserve_slot(&self, requester: &UserId) -> Result<OwnedSemaphorePermit, ProvisionError> {
        loop {
            match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(slot) => return Ok(slot),
                Err(TryAcquireError::Closed) => return Err(ProvisionError::ShuttingDown),
                Err(TryAcquireError::NoPermits) => {}
            }

            if self.is_closed() {
                return Err(ProvisionError::ShuttingDown);
            }

            if self.evict_lru(requester).await {
                continue;
            }

            // Every slot is held by an in-flight provisioning or a busy victim
            tokio::select! {
                slot = Arc::clone(&self.slots).acquire_owned() => {
                    return slot.map_err(|_| ProvisionError::ShuttingDown);
                }
                () = self.closing.cancelled() => return Err(ProvisionError::ShuttingDown),
                () = tokio::time::sleep(EVICTION_RETRY) => {}
            }
        }
    }

    /// Evict the least recently used resident handle.
    ///
    /// Returns true if a victim was destroyed or the candidate set changed
    /// under us (so the caller should re-scan), false if nothing could be
    /// evicted right now.
    async fn evict_lru(&self, requester: &UserId) -> bool {
        let mut candidates: Vec<(Instant, UserId, HandleId)> = {
            let registry = self.registry.read().await;
            registry
                .iter()
                .filter(|(user, _)| *user != requester)
                .map(|(user, resident)| (resident.handle.last_used(), user.clone(), resident.handle.id()))
                .collect()
        };
        candidates.sort();

        for (last_used, user, id) in candidates {
            let Some(_gate) = self.gates.try_lock(&user) else {
                debug!(user = %user, "Eviction candidate busy, skipping");
                continue;
            };

            let evicted = self
                .destroy_locked(&user, Expect::Unchanged { id, last_used }, RemovalReason::Evicted)
                .await;
            if evicted {
                self.metrics.record_eviction();
            }
            return true;
        }

        false
    }

    /// Unlink and tear down `user`'s handle if `expect` still holds.
    ///
    /// Caller must hold `user`'s gate.
    async fn destroy_locked(&self, user: &UserId, expect: Expect, reason: RemovalReason) -> bool {
        let resident = {
            let mut registry = self.registry.write().await;
            match registry.get(user) {
                Some(resident) if expect.holds(&resident.handle) => {}
                _ => return false,
            }
            let Some(resident) = registry.remove(user) else {
                return false;
            };
            self.metrics.set_resident(registry.len());
            resident
        };

        self.teardown(resident, reason).await;
        true
    }

    /// Tear down an unlinked handle. Its slot is freed only afterwards.
    async fn teardown(&self, resident: Resident<P::Backing>, reason: RemovalReason) {
        self.discard(&resident.handle, reason).await;
        drop(resident);
    }

    async fn discard(&self, handle: &ResourceHandle<P::Backing>, reason: RemovalReason) {
        let user = handle.user_id();
        match self.provisioner.teardown(user, handle.backing()).await {
            Ok(()) => {
                info!(user = %user, handle = %handle.id(), reason = reason.as_str(), "Removed backend");
            }
            Err(e) => {
                self.metrics.record_teardown_failure();
                warn!(
                    user = %user,
                    handle = %handle.id(),
                    reason = reason.as_str(),
                    error = %e,
                    "Teardown failed, handle unlinked anyway"
                );
            }
        }
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.len()
    }
}
