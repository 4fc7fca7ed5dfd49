// ABOUTME: Counters for pool lifecycle and call outcomes
//
// Tracks:
// - Acquires: total, reuse hits, fresh provisions, provision failures
// - Removals: evictions, idle reaps, explicit releases, teardown failures
// - Calls: errors surfaced to callers
// - Residents: current gauge

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Pool-level metrics
#[derive(Debug, Default)]
pub struct PoolMetrics {
    acquires: AtomicU64,
    reuse_hits: AtomicU64,
    provisions: AtomicU64,
    provision_failures: AtomicU64,
    evictions: AtomicU64,
    reaped: AtomicU64,
    releases: AtomicU64,
    teardown_failures: AtomicU64,
    call_errors: AtomicU64,
    resident: AtomicUsize,
}

/// Plain copy of the counters, for printing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub acquires: u64,
    pub reuse_hits: u64,
    pub provisions: u64,
    pub provision_failures: u64,
    pub evictions: u64,
    pub reaped: u64,
    pub releases: u64,
    pub teardown_failures: u64,
    pub call_errors: u64,
    pub resident: usize,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acquire(&self, reused: bool) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        if reused {
            self.reuse_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_provision(&self) {
        self.provisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provision_failure(&self) {
        self.provision_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reaped(&self, count: usize) {
        self.reaped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_teardown_failure(&self) {
        self.teardown_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_error(&self) {
        self.call_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_resident(&self, count: usize) {
        self.resident.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            acquires: self.acquires.load(Ordering::Relaxed),
            reuse_hits: self.reuse_hits.load(Ordering::Relaxed),
            provisions: self.provisions.load(Ordering::Relaxed),
            provision_failures: self.provision_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            teardown_failures: self.teardown_failures.load(Ordering::Relaxed),
            call_errors: self.call_errors.load(Ordering::Relaxed),
            resident: self.resident.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_counts_as_acquire() {
        let metrics = PoolMetrics::new();
        metrics.record_acquire(false);
        metrics.record_acquire(true);
        metrics.record_acquire(true);

        let snap = metrics.snapshot();
        assert_eq!(snap.acquires, 3);
        assert_eq!(snap.reuse_hits, 2);
    }

    #[test]
    fn test_resident_gauge_overwrites() {
        let metrics = PoolMetrics::new();
        metrics.set_resident(4);
        metrics.set_resident(1);
        metrics.record_reaped(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.resident, 1);
        assert_eq!(snap.reaped, 3);
    }
}
