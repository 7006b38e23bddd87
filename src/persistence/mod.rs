//! Durable track history.
//!
//! Object summaries and discretized track points are written off the live
//! path by a background writer, read back for replay/audit, and purged on a
//! daily retention schedule. Every failure here is logged and swallowed.

use serde::{Deserialize, Serialize};

use crate::state::{EntityKind, TrackedEntity};

pub mod config;
pub mod retention;
pub mod store;
pub mod writer;


pub use config::PersistenceConfig;
pub use retention::{delay_until_next_local_midnight, retention_cutoff, schedule_retention_sweep};
pub use store::{HistoryStore, PurgeReport, SCHEMA_VERSION};
pub use writer::{PersistJob, PersistenceQueue, PersistenceWriter};

/// Durable per-entity summary
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: String,
    pub display_name: String,
    pub kind: EntityKind,
    /// Write-once: kept from the first stored observation
    pub first_seen_at: i64,
    /// Advances to the newest observation
    pub last_seen_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl From<&TrackedEntity> for ObjectRecord {
    fn from(entity: &TrackedEntity) -> Self {
        Self {
            id: entity.id.clone(),
            display_name: entity.display_name().to_string(),
            kind: entity.kind,
            first_seen_at: entity.last_update_at,
            last_seen_at: entity.last_update_at,
            source_id: entity.source_id.clone(),
        }
    }
}

/// Durable position sample keyed by `(entity_id, timestamp)`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub entity_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    pub timestamp: i64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub direction: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub detection_count: Option<u64>,
}

impl From<&TrackedEntity> for TrackPoint {
    fn from(entity: &TrackedEntity) -> Self {
        Self {
            entity_id: entity.id.clone(),
            latitude: entity.position.latitude,
            longitude: entity.position.longitude,
            altitude: entity.position.altitude,
            timestamp: entity.last_update_at,
            speed: entity.attributes.speed,
            direction: entity.attributes.direction,
            confidence: entity.attributes.confidence,
            source_id: entity.source_id.clone(),
            detection_count: entity.attributes.detection_count,
        }
    }
}
