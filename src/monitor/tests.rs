use super::*;
use crate::diagnostics::DiagnosticLog;
use crate::state::{EntityAttributes, EntityKind, Position, TrackedEntity, TrackingStore};

fn entity_at(id: &str, ts: i64) -> TrackedEntity {
    TrackedEntity {
        id: id.to_string(),
        kind: EntityKind::Wildlife,
        position: Position {
            latitude: 1.0,
            longitude: 2.0,
            altitude: None,
        },
        last_update_at: ts,
        received_at: 0,
        source_id: None,
        attributes: EntityAttributes::default(),
    }
}

fn monitor(store: Arc<TrackingStore>, diagnostics: Arc<DiagnosticLog>) -> TimeoutMonitor {
    TimeoutMonitor::new(
        store,
        diagnostics,
        Duration::from_secs(30),
        Duration::from_secs(5),
    )
}

#[test]
fn test_sweep_evicts_only_stale_entities() {
    let store = Arc::new(TrackingStore::new(10));
    let diagnostics = Arc::new(DiagnosticLog::new(10));
    let monitor = monitor(store.clone(), diagnostics.clone());

    store.upsert_received_at(entity_at("stale", 0), 0);
    store.upsert_received_at(entity_at("fresh", 50_000), 50_000);
    store.upsert_received_at(entity_at("boundary", 30_000), 30_000);

    let evicted = monitor.sweep(60_000);

    assert_eq!(evicted, vec!["stale".to_string()]);
    assert!(store.entity("stale").is_none());
    assert!(store.path("stale").is_none());
    // Exactly at the threshold is not stale
    assert!(store.entity("boundary").is_some());
    assert!(store.entity("fresh").is_some());

    let entries = diagnostics.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].category, DiagnosticCategory::Eviction);
}

#[test]
fn test_sweep_with_nothing_stale_is_quiet() {
    let store = Arc::new(TrackingStore::new(10));
    let diagnostics = Arc::new(DiagnosticLog::new(10));
    let monitor = monitor(store.clone(), diagnostics.clone());

    store.upsert_received_at(entity_at("a", 10_000), 10_000);

    assert!(monitor.sweep(20_000).is_empty());
    assert!(diagnostics.is_empty());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_refreshed_entity_survives_removal_check() {
    let store = Arc::new(TrackingStore::new(10));
    store.upsert_received_at(entity_at("a", 0), 0);

    // A sweep read the old snapshot, then the entity was refreshed
    let stale_view = store.snapshot();
    assert!(stale_view.entity("a").unwrap().age_ms(60_000) > 30_000);
    store.upsert_received_at(entity_at("a", 59_000), 59_000);

    assert!(!store.remove_if_stale("a", 60_000, 30_000));
    assert!(store.entity("a").is_some());
}

#[test]
fn test_reporting_entity_with_lagging_clock_survives() {
    let store = Arc::new(TrackingStore::new(10));
    let diagnostics = Arc::new(DiagnosticLog::new(10));
    let monitor = monitor(store.clone(), diagnostics.clone());

    // Sensor clock runs 45 s behind; a sample arrives every second
    for second in 0..5_i64 {
        let now = 100_000 + second * 1_000;
        store.upsert_received_at(entity_at("lagging", now - 45_000), now);
        assert!(monitor.sweep(now + 500).is_empty());
    }

    assert!(store.entity("lagging").is_some());
    assert_eq!(store.path("lagging").unwrap().len(), 5);
    assert!(diagnostics.is_empty());

    // Silence past the threshold still evicts it
    assert_eq!(monitor.sweep(104_000 + 30_001), vec!["lagging".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_sweeps_on_interval() {
    let store = Arc::new(TrackingStore::new(10));
    let diagnostics = Arc::new(DiagnosticLog::new(10));

    // Last heard from long ago
    store.upsert_received_at(entity_at("silent", 0), 0);
    // Old wire timestamp, but just received
    store.upsert(entity_at("live", 0));

    let handle = monitor(store.clone(), diagnostics).spawn();
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(store.entity("silent").is_none());
    assert!(store.entity("live").is_some());
    handle.abort();
}
