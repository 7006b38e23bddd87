use super::*;
use crate::persistence::{HistoryStore, PersistenceQueue, PersistenceWriter};
use crate::diagnostics::DiagnosticLog;
use std::sync::Arc;
use std::thread;

fn entity_at(id: &str, ts: i64, latitude: f64, longitude: f64) -> TrackedEntity {
    TrackedEntity {
        id: id.to_string(),
        kind: EntityKind::Person,
        position: Position {
            latitude,
            longitude,
            altitude: None,
        },
        last_update_at: ts,
        received_at: 0,
        source_id: None,
        attributes: EntityAttributes::default(),
    }
}

fn latitudes(path: &Path) -> Vec<f64> {
    path.points().map(|p| p.latitude).collect()
}

#[test]
fn test_first_update_creates_entity_and_path() {
    let store = TrackingStore::new(100);

    store.upsert(entity_at("A", 0, 10.0, 20.0));

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 1);
    let entity = snapshot.entity("A").unwrap();
    assert_eq!(entity.position.latitude, 10.0);
    assert_eq!(entity.position.longitude, 20.0);
    assert_eq!(snapshot.path("A").unwrap().len(), 1);
    assert_eq!(snapshot.last_touched(), Some("A"));
}

#[test]
fn test_second_update_extends_path_and_moves_entity() {
    let store = TrackingStore::new(100);

    store.upsert(entity_at("A", 0, 10.0, 20.0));
    store.upsert(entity_at("A", 1, 10.001, 20.001));

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.entity("A").unwrap().position.latitude, 10.001);
    assert_eq!(snapshot.entity("A").unwrap().last_update_at, 1);

    let path = snapshot.path("A").unwrap();
    assert_eq!(path.len(), 2);
    assert_eq!(latitudes(path), vec![10.0, 10.001]);
}

#[test]
fn test_repeated_upserts_keep_single_latest_entry() {
    let store = TrackingStore::new(10);

    for i in 0..50 {
        store.upsert(entity_at("A", i, i as f64, 0.0));
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.entity("A").unwrap().last_update_at, 49);
}

#[test]
fn test_path_trim_keeps_newest_points() {
    let store = TrackingStore::new(3);

    for (i, lat) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
        store.upsert(entity_at("C", i as i64, lat, 0.0));
    }

    let path = store.path("C").unwrap();
    assert_eq!(latitudes(&path), vec![2.0, 3.0, 4.0]);
}

#[test]
fn test_path_bound_holds_for_long_sequences() {
    let store = TrackingStore::new(25);

    for i in 0..1000 {
        store.upsert(entity_at("long", i, i as f64, 0.0));
        assert!(store.path("long").unwrap().len() <= 25);
    }

    let path = store.path("long").unwrap();
    let expected: Vec<f64> = (975..1000).map(|i| i as f64).collect();
    assert_eq!(latitudes(&path), expected);
}

#[test]
fn test_remove_drops_entity_and_path() {
    let store = TrackingStore::new(10);
    store.upsert(entity_at("B", 0, 1.0, 1.0));
    store.upsert(entity_at("B", 1, 1.1, 1.1));

    let removed = store.remove("B");
    assert!(removed.is_some());

    let snapshot = store.snapshot();
    assert!(snapshot.entity("B").is_none());
    assert!(snapshot.path("B").is_none());

    // Removing again is a no-op
    assert!(store.remove("B").is_none());
}

#[test]
fn test_snapshot_is_unaffected_by_later_mutations() {
    let store = TrackingStore::new(10);
    store.upsert(entity_at("A", 0, 1.0, 1.0));

    let before = store.snapshot();
    store.upsert(entity_at("A", 1, 2.0, 2.0));
    store.upsert(entity_at("B", 1, 3.0, 3.0));
    store.remove("A");

    assert_eq!(before.len(), 1);
    assert_eq!(before.entity("A").unwrap().position.latitude, 1.0);
    assert_eq!(before.path("A").unwrap().len(), 1);

    let after = store.snapshot();
    assert!(after.entity("A").is_none());
    assert!(after.version() > before.version());
}

#[test]
fn test_clear_empties_both_maps() {
    let store = TrackingStore::new(10);
    store.upsert(entity_at("A", 0, 1.0, 1.0));
    store.upsert(entity_at("B", 0, 1.0, 1.0));

    assert_eq!(store.clear(), 2);

    let snapshot = store.snapshot();
    assert!(snapshot.is_empty());
    assert!(snapshot.paths().is_empty());
    assert_eq!(store.clear(), 0);
}

#[test]
fn test_remove_if_stale_respects_refresh() {
    let store = TrackingStore::new(10);
    store.upsert_received_at(entity_at("A", 1_000, 1.0, 1.0), 1_000);

    // Refreshed before the removal evaluates it
    store.upsert_received_at(entity_at("A", 9_000, 1.0, 1.0), 9_000);
    assert!(!store.remove_if_stale("A", 10_000, 5_000));
    assert!(store.entity("A").is_some());

    assert!(store.remove_if_stale("A", 20_000, 5_000));
    assert!(store.entity("A").is_none());
    assert!(store.path("A").is_none());
}

#[test]
fn test_upsert_stamps_receive_time() {
    let store = TrackingStore::new(10);
    let before = chrono::Utc::now().timestamp_millis();

    // Sensor clock far behind the local clock
    store.upsert(entity_at("A", 1_000, 1.0, 1.0));

    let entity = store.entity("A").unwrap();
    assert_eq!(entity.last_update_at, 1_000);
    assert!(entity.received_at >= before);
    assert_eq!(store.path("A").unwrap().to_vec()[0].timestamp, 1_000);
}

#[test]
fn test_change_events_are_broadcast() {
    let store = TrackingStore::new(10);
    let mut rx = store.subscribe();

    store.upsert(entity_at("A", 0, 1.0, 1.0));
    store.remove("A");
    store.upsert(entity_at("B", 0, 1.0, 1.0));
    store.clear();

    assert!(matches!(rx.try_recv().unwrap(), ChangeEvent::Upserted { entity_id, .. } if entity_id == "A"));
    assert!(matches!(rx.try_recv().unwrap(), ChangeEvent::Removed { entity_id, .. } if entity_id == "A"));
    assert!(matches!(rx.try_recv().unwrap(), ChangeEvent::Upserted { entity_id, .. } if entity_id == "B"));
    assert!(matches!(rx.try_recv().unwrap(), ChangeEvent::Cleared { removed: 1, .. }));
}

#[test]
fn test_watchers_see_new_snapshots() {
    let store = TrackingStore::new(10);
    let mut rx = store.watch();
    rx.mark_unchanged();

    store.upsert(entity_at("A", 0, 1.0, 1.0));
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().len(), 1);

    // Status changes are part of the snapshot too
    store.set_connection_status(ConnectionStatus::Connected);
    assert!(rx.has_changed().unwrap());
    assert_eq!(
        rx.borrow_and_update().connection_status(),
        ConnectionStatus::Connected
    );

    // Unchanged status publishes nothing
    store.set_connection_status(ConnectionStatus::Connected);
    assert!(!rx.has_changed().unwrap());
}

#[test]
fn test_concurrent_upserts() {
    let store = Arc::new(TrackingStore::new(5));
    let mut handles = vec![];

    for i in 0..10 {
        let store_clone = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for ts in 0..20 {
                store_clone.upsert(entity_at(&format!("entity_{}", i), ts, ts as f64, 0.0));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 10);
    assert_eq!(snapshot.paths().len(), 10);
    for path in snapshot.paths().values() {
        assert_eq!(path.len(), 5);
    }
}

#[tokio::test]
async fn test_upsert_persists_in_background() {
    let history = Arc::new(HistoryStore::open_in_memory("test").unwrap());
    let (queue, rx) = PersistenceQueue::bounded(64);
    let writer = PersistenceWriter::new(history.clone(), Arc::new(DiagnosticLog::new(10)), 8)
        .spawn(rx);

    let store = TrackingStore::new(10).with_persistence(queue);
    store.upsert(entity_at("A", 100, 1.0, 2.0));
    store.upsert(entity_at("A", 200, 1.5, 2.5));

    // Dropping the store closes the queue and lets the writer finish
    drop(store);
    writer.await.unwrap();

    let record = history.object_record("A").unwrap().unwrap();
    assert_eq!(record.first_seen_at, 100);
    assert_eq!(record.last_seen_at, 200);
    assert_eq!(history.query_path("A", None, None).unwrap().len(), 2);
}
