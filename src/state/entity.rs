use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Classification of a tracked object.
///
/// Unrecognized wire values deserialize to `Unknown` instead of failing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Vehicle,
    Wildlife,
    #[default]
    #[serde(other)]
    Unknown,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Vehicle => "vehicle",
            EntityKind::Wildlife => "wildlife",
            EntityKind::Unknown => "unknown",
        }
    }

    /// Lenient parse used when reading persisted rows.
    pub fn parse(value: &str) -> Self {
        match value {
            "person" => EntityKind::Person,
            "vehicle" => EntityKind::Vehicle,
            "wildlife" => EntityKind::Wildlife,
            _ => EntityKind::Unknown,
        }
    }
}

/// Single geolocation sample
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

/// Classification-specific fields; every one of them may be missing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
    /// Free-form metadata not covered by the typed fields above
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// One currently-visible object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// Stable track identifier
    pub id: String,

    pub kind: EntityKind,

    /// Latest position sample
    pub position: Position,

    /// Observation time of the latest sample as reported by the sensor
    /// (Unix epoch milliseconds); orders path and history points
    pub last_update_at: i64,

    /// Local time the store accepted the latest sample (Unix epoch
    /// milliseconds); staleness is measured against it
    #[serde(default)]
    pub received_at: i64,

    /// Reporting sensor/camera, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,

    #[serde(default)]
    pub attributes: EntityAttributes,
}

impl TrackedEntity {
    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.attributes.display_name.as_deref().unwrap_or(&self.id)
    }

    /// Milliseconds since the store last heard about this entity
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.received_at
    }
}
