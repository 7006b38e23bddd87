use crate::persistence::{PersistJob, PersistenceQueue};
use crate::state::entity::TrackedEntity;
use crate::state::path::{Path, PathPoint};
use crate::state::snapshot::{ConnectionStatus, TrackingSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Per-entity change notification for delta-driven consumers
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Upserted {
        entity_id: String,
        timestamp: DateTime<Utc>,
    },
    Removed {
        entity_id: String,
        timestamp: DateTime<Utc>,
    },
    Cleared {
        removed: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Authoritative in-memory tracking state.
///
/// Every mutation runs synchronously under the watch channel's write lock
/// and publishes one new snapshot, so readers never see the entity map and
/// the path map out of step. Persistence is handed to the queue afterwards
/// and never awaited.
pub struct TrackingStore {
    state_tx: watch::Sender<TrackingSnapshot>,

    /// Broadcast channel for per-entity deltas
    change_tx: broadcast::Sender<ChangeEvent>,

    persistence: Option<PersistenceQueue>,

    max_path_points: usize,
}

impl TrackingStore {
    pub fn new(max_path_points: usize) -> Self {
        let (state_tx, _) = watch::channel(TrackingSnapshot::default());
        let (change_tx, _) = broadcast::channel(1000);

        Self {
            state_tx,
            change_tx,
            persistence: None,
            max_path_points: max_path_points.max(1),
        }
    }

    /// Persist every upsert through `queue`
    pub fn with_persistence(mut self, queue: PersistenceQueue) -> Self {
        self.persistence = Some(queue);
        self
    }

    /// Insert or replace an entity and extend its path, stamped as received now
    pub fn upsert(&self, entity: TrackedEntity) {
        self.upsert_received_at(entity, Utc::now().timestamp_millis());
    }

    /// `upsert` with an explicit local receive time (epoch milliseconds)
    pub fn upsert_received_at(&self, mut entity: TrackedEntity, received_at: i64) {
        entity.received_at = received_at;
        let job = self.persistence.as_ref().map(|_| PersistJob::from(&entity));
        let entity_id = entity.id.clone();
        let point = PathPoint::from(&entity);
        let max_points = self.max_path_points;

        self.state_tx.send_modify(|state| {
            let paths = Arc::make_mut(&mut state.paths);
            let path = paths
                .entry(entity_id.clone())
                .or_insert_with(|| Arc::new(Path::new(entity_id.clone(), max_points)));
            Arc::make_mut(path).push(point);

            Arc::make_mut(&mut state.entities).insert(entity_id.clone(), entity);
            state.last_touched = Some(entity_id.clone());
            state.version += 1;
        });

        debug!(entity_id = %entity_id, "Entity upserted");

        let _ = self.change_tx.send(ChangeEvent::Upserted {
            entity_id,
            timestamp: Utc::now(),
        });

        if let (Some(queue), Some(job)) = (&self.persistence, job) {
            queue.enqueue(job);
        }
    }

    /// Delete an entity together with its path
    pub fn remove(&self, entity_id: &str) -> Option<TrackedEntity> {
        let mut removed = None;

        self.state_tx.send_if_modified(|state| {
            removed = remove_locked(state, entity_id);
            removed.is_some()
        });

        if removed.is_some() {
            info!(entity_id = %entity_id, "Entity removed");
            self.notify_removed(entity_id);
        }

        removed
    }

    /// Delete an entity only if it is still stale at the moment of removal.
    ///
    /// Staleness is evaluated against the current state under the write lock,
    /// so an entity refreshed after the caller's read survives.
    pub fn remove_if_stale(&self, entity_id: &str, now_ms: i64, threshold_ms: i64) -> bool {
        let mut removed = None;

        self.state_tx.send_if_modified(|state| {
            let stale = state
                .entities
                .get(entity_id)
                .map(|entity| entity.age_ms(now_ms) > threshold_ms)
                .unwrap_or(false);
            if stale {
                removed = remove_locked(state, entity_id);
            }
            removed.is_some()
        });

        if removed.is_some() {
            self.notify_removed(entity_id);
            true
        } else {
            false
        }
    }

    /// Administrative reset of both maps
    pub fn clear(&self) -> usize {
        let mut count = 0;

        self.state_tx.send_if_modified(|state| {
            count = state.entities.len().max(state.paths.len());
            if count == 0 {
                return false;
            }
            state.entities = Arc::new(HashMap::new());
            state.paths = Arc::new(HashMap::new());
            state.last_touched = None;
            state.version += 1;
            true
        });

        if count > 0 {
            info!(removed = count, "Tracking state cleared");
            let _ = self.change_tx.send(ChangeEvent::Cleared {
                removed: count,
                timestamp: Utc::now(),
            });
        }

        count
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.state_tx.send_if_modified(|state| {
            if state.connection_status == status {
                return false;
            }
            state.connection_status = status;
            state.version += 1;
            true
        });
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> TrackingSnapshot {
        self.state_tx.borrow().clone()
    }

    pub fn entity(&self, entity_id: &str) -> Option<TrackedEntity> {
        self.state_tx.borrow().entities.get(entity_id).cloned()
    }

    pub fn path(&self, entity_id: &str) -> Option<Arc<Path>> {
        self.state_tx.borrow().paths.get(entity_id).cloned()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state_tx.borrow().connection_status
    }

    pub fn len(&self) -> usize {
        self.state_tx.borrow().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that observes every published snapshot
    pub fn watch(&self) -> watch::Receiver<TrackingSnapshot> {
        self.state_tx.subscribe()
    }

    /// Subscribe to per-entity deltas
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }

    fn notify_removed(&self, entity_id: &str) {
        let _ = self.change_tx.send(ChangeEvent::Removed {
            entity_id: entity_id.to_string(),
            timestamp: Utc::now(),
        });
    }
}

fn remove_locked(state: &mut TrackingSnapshot, entity_id: &str) -> Option<TrackedEntity> {
    if !state.entities.contains_key(entity_id) {
        return None;
    }

    let removed = Arc::make_mut(&mut state.entities).remove(entity_id);
    Arc::make_mut(&mut state.paths).remove(entity_id);

    state.last_touched = Some(entity_id.to_string());
    state.version += 1;
    removed
}
