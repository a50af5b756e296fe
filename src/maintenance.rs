//! Background maintenance: expired mapping eviction and idle rate-window purge.
//!
//! Runs as a background Tokio task ticking every `cleanup_interval_secs`.
//! The interval bounds how long an expired record may physically linger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::admission::RateLimiter;
use crate::store::MappingStore;

/// What one sweep reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired mapping records removed.
    pub evicted_mappings: usize,
    /// Idle rate-limit identities dropped.
    pub purged_identities: usize,
}

/// Run one maintenance pass.
///
/// A store error is logged and the limiter purge still runs.
pub async fn sweep(store: &dyn MappingStore, limiter: &RateLimiter) -> SweepReport {
    let evicted_mappings = match store.evict_expired().await {
        Ok(n) => n,
        Err(e) => {
            warn!(backend = store.backend(), error = %e, "mapping eviction failed");
            0
        }
    };
    let purged_identities = limiter.purge_idle(Instant::now());
    SweepReport {
        evicted_mappings,
        purged_identities,
    }
}

/// Run the maintenance loop until shutdown.
///
/// Exits when the shutdown signal is received or the watch channel closes.
pub async fn run_maintenance(
    store: Arc<dyn MappingStore>,
    limiter: Arc<RateLimiter>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(interval_secs = every.as_secs(), backend = store.backend(), "maintenance started");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first immediate tick.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = sweep(store.as_ref(), &limiter).await;
                debug!(
                    evicted = report.evicted_mappings,
                    purged = report.purged_identities,
                    "maintenance sweep"
                );
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("maintenance shutting down");
                    break;
                }
            }
        }
    }

    info!("maintenance stopped");
}
