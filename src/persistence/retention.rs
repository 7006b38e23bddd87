//! Daily retention sweep.

use super::{HistoryStore, PurgeReport};
use crate::diagnostics::{DiagnosticCategory, DiagnosticLog};
use chrono::{DateTime, Local, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{error, info};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Epoch-ms cutoff for a retention window ending at `now_ms`
pub fn retention_cutoff(now_ms: i64, retention_days: u32) -> i64 {
    now_ms.saturating_sub(i64::from(retention_days) * DAY_MS)
}

/// Time left until the next midnight in `now`'s time zone.
///
/// Falls back to a full day when that midnight does not exist locally
/// (DST gap) or cannot be computed.
pub fn delay_until_next_local_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let tz = now.timezone();
    let next_midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|naive| tz.from_local_datetime(&naive).earliest());

    match next_midnight {
        Some(next) => {
            let millis = next.timestamp_millis() - now.timestamp_millis();
            if millis > 0 {
                Duration::from_millis(millis as u64)
            } else {
                DAY
            }
        }
        None => DAY,
    }
}

/// Starts the retention loop: first purge at the next local midnight, then
/// every 24 hours for the lifetime of the process (or until aborted).
pub fn schedule_retention_sweep(
    store: Arc<HistoryStore>,
    retention_days: u32,
    diagnostics: Arc<DiagnosticLog>,
) -> JoinHandle<()> {
    let delay = delay_until_next_local_midnight(&Local::now());
    info!(
        retention_days = retention_days,
        first_run_in_secs = delay.as_secs(),
        "Retention sweep scheduled"
    );

    spawn_retention_loop(store, retention_days, diagnostics, delay)
}

/// Purge once `first_delay` has elapsed, then on a fixed daily cadence
pub(crate) fn spawn_retention_loop(
    store: Arc<HistoryStore>,
    retention_days: u32,
    diagnostics: Arc<DiagnosticLog>,
    first_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + first_delay, DAY);
        loop {
            timer.tick().await;
            run_retention_sweep(&store, retention_days, &diagnostics).await;
        }
    })
}

/// Purges records outside the retention window; failures are logged only
pub async fn run_retention_sweep(
    store: &Arc<HistoryStore>,
    retention_days: u32,
    diagnostics: &DiagnosticLog,
) -> Option<PurgeReport> {
    let cutoff = retention_cutoff(Utc::now().timestamp_millis(), retention_days);
    let task_store = Arc::clone(store);

    let result = tokio::task::spawn_blocking(move || task_store.purge_older_than(cutoff)).await;

    match result {
        Ok(Ok(report)) => {
            info!(
                cutoff = cutoff,
                object_records = report.object_records,
                track_points = report.track_points,
                "Retention sweep complete"
            );
            Some(report)
        }
        Ok(Err(e)) => {
            error!(error = %e, cutoff = cutoff, "Retention sweep failed");
            diagnostics.record_with(
                DiagnosticCategory::Persistence,
                "Retention sweep failed",
                json!({ "error": format!("{:#}", e), "cutoff": cutoff }),
            );
            None
        }
        Err(e) => {
            error!(error = %e, "Retention sweep task panicked");
            None
        }
    }
}
