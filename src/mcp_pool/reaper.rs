// ABOUTME: Background task removing pool handles that sat unused past a threshold
// ABOUTME: Shares the pool's re-validate-then-destroy path with LRU eviction

//! Idle reaper.
//!
//! ```text
//! ┌──────────────┐  tick   ┌──────────────────────────────┐
//! │   interval   │ ──────► │ pool.reap_idle_before(cutoff)│
//! └──────────────┘         └──────────────────────────────┘
//!        ▲                       cutoff = now - idle_threshold
//!        │ cancel
//!   shutdown token
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pool::ResourcePool;
use super::provisioner::Provisioner;

/// How long `stop` waits for an in-progress sweep before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// `tokio::time::interval` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically tears down idle handles.
#[derive(Debug)]
pub struct IdleReaper {
    interval: Duration,
    idle_threshold: Duration,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl IdleReaper {
    /// Create a stopped reaper.
    ///
    /// # Arguments
    ///
    /// * `interval` - Time between sweeps
    /// * `idle_threshold` - Handles unused for longer than this are removed
    pub fn new(interval: Duration, idle_threshold: Duration) -> Self {
        Self {
            interval,
            idle_threshold,
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }

    /// Spawn the background sweep loop. Restarts it if already running.
    pub fn start<P: Provisioner>(&mut self, pool: Arc<ResourcePool<P>>) {
        if let Some(old) = self.handle.take() {
            old.abort();
        }
        self.shutdown = CancellationToken::new();

        let shutdown = self.shutdown.clone();
        let interval = self.interval;
        let idle_threshold = self.idle_threshold;

        let handle = tokio::spawn(async move {
            Self::reap_loop(pool, interval, idle_threshold, shutdown).await;
        });

        self.handle = Some(handle);
        info!(
            interval_secs = self.interval.as_secs(),
            idle_threshold_secs = self.idle_threshold.as_secs(),
            "Idle reaper started"
        );
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();

        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                warn!("Idle reaper did not stop within {:?}, aborting sweep", STOP_TIMEOUT);
                handle.abort();
                let _ = handle.await;
            }
            info!("Idle reaper stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished()) && !self.shutdown.is_cancelled()
    }

    /// Run a single sweep. Exposed for manual sweeps and tests.
    pub async fn reap_once<P: Provisioner>(pool: &ResourcePool<P>, idle_threshold: Duration) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(idle_threshold) else {
            // Process is younger than the threshold, nothing can be idle yet
            return 0;
        };

        let reaped = pool.reap_idle_before(cutoff).await;
        if reaped > 0 {
            info!(reaped, "Reaped idle handles");
        } else {
            debug!("No idle handles");
        }
        reaped
    }

    async fn reap_loop<P: Provisioner>(
        pool: Arc<ResourcePool<P>>,
        interval: Duration,
        idle_threshold: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; nothing can be idle yet
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    Self::reap_once(&pool, idle_threshold).await;
                }
            }
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
