//! Evicts entities that stop reporting without an explicit termination.

use crate::diagnostics::{DiagnosticCategory, DiagnosticLog};
use crate::state::TrackingStore;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

#[cfg(test)]
mod tests;

/// Periodic staleness sweep over the tracking store
pub struct TimeoutMonitor {
    store: Arc<TrackingStore>,
    diagnostics: Arc<DiagnosticLog>,
    stale_after: Duration,
    sweep_interval: Duration,
}

impl TimeoutMonitor {
    pub fn new(
        store: Arc<TrackingStore>,
        diagnostics: Arc<DiagnosticLog>,
        stale_after: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            store,
            diagnostics,
            stale_after,
            sweep_interval,
        }
    }

    /// Spawn the sweep loop; aborting the handle stops it
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!(
            stale_after_secs = self.stale_after.as_secs(),
            interval_secs = self.sweep_interval.as_secs(),
            "Starting object timeout monitor"
        );

        let mut ticker = interval(self.sweep_interval);

        // Skip missed ticks to prevent a burst of sweeps after a stall
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.sweep(Utc::now().timestamp_millis());
        }
    }

    /// One sweep at `now_ms`; returns the evicted ids.
    ///
    /// Candidates come from the current snapshot, and each removal re-checks
    /// staleness against the live state, so an entity refreshed in between
    /// is kept.
    pub fn sweep(&self, now_ms: i64) -> Vec<String> {
        let threshold_ms = self.stale_after.as_millis() as i64;
        let snapshot = self.store.snapshot();

        let candidates: Vec<String> = snapshot
            .entities()
            .values()
            .filter(|entity| entity.age_ms(now_ms) > threshold_ms)
            .map(|entity| entity.id.clone())
            .collect();
        drop(snapshot);

        let mut evicted = Vec::with_capacity(candidates.len());
        for entity_id in candidates {
            if self.store.remove_if_stale(&entity_id, now_ms, threshold_ms) {
                evicted.push(entity_id);
            }
        }

        if evicted.is_empty() {
            debug!("Timeout sweep found no stale entities");
        } else {
            info!(evicted = evicted.len(), "Evicted stale entities");
            self.diagnostics.record_with(
                DiagnosticCategory::Eviction,
                format!("Evicted {} stale entities", evicted.len()),
                json!({ "entity_ids": evicted, "stale_after_ms": threshold_ms }),
            );
        }

        evicted
    }
}
