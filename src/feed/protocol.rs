use crate::state::{EntityAttributes, EntityKind, Position, TrackedEntity};
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

/// Event descriptions that mean the track has ended, used only when the
/// message carries no explicit `track_ended` flag.
const TRACK_END_PHRASES: [&str; 3] = ["track ended", "track lost", "track terminated"];

/// Decoded inbound feed message
#[derive(Clone, Debug, PartialEq)]
pub enum FeedMessage {
    /// Informational greeting; no state change
    Connection { message: Option<String> },

    /// Position update; always an upsert
    TrackingUpdate(TrackedEntity),

    /// Detection event that keeps the track alive; an upsert
    Event {
        entity: TrackedEntity,
        description: Option<String>,
    },

    /// Detection event that ends the track; only the id is required
    TrackEnded {
        entity_id: String,
        description: Option<String>,
    },
}

impl FeedMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            FeedMessage::Connection { .. } => "connection",
            FeedMessage::TrackingUpdate(_) => "tracking_update",
            FeedMessage::Event { .. } | FeedMessage::TrackEnded { .. } => "event",
        }
    }

    pub fn entity_id(&self) -> Option<&str> {
        match self {
            FeedMessage::Connection { .. } => None,
            FeedMessage::TrackingUpdate(entity) => Some(&entity.id),
            FeedMessage::Event { entity, .. } => Some(&entity.id),
            FeedMessage::TrackEnded { entity_id, .. } => Some(entity_id),
        }
    }
}

/// Reasons an inbound frame is dropped
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    InvalidJson(String),
    MissingType,
    UnknownType(String),
    MissingObject,
    InvalidObject(String),
    MissingField(&'static str),
    InvalidTimestamp(String),
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidJson(e) => write!(f, "invalid JSON: {}", e),
            DecodeError::MissingType => write!(f, "message has no 'type' field"),
            DecodeError::UnknownType(t) => write!(f, "unknown message type '{}'", t),
            DecodeError::MissingObject => write!(f, "message has no 'object' payload"),
            DecodeError::InvalidObject(e) => write!(f, "invalid object payload: {}", e),
            DecodeError::MissingField(field) => write!(f, "object field '{}' is required", field),
            DecodeError::InvalidTimestamp(ts) => {
                write!(f, "timestamp '{}' is not ISO-8601", ts)
            }
            DecodeError::InvalidCoordinates {
                latitude,
                longitude,
            } => write!(f, "coordinates out of range: ({}, {})", latitude, longitude),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Object payload as sent by the analytics feed
#[derive(Debug, Deserialize)]
struct WireObject {
    id: String,
    #[serde(rename = "type", default)]
    kind: EntityKind,
    #[serde(default)]
    name: Option<String>,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    direction: Option<f64>,
    timestamp: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

/// Decode one text frame into a typed message
pub fn decode(text: &str) -> Result<FeedMessage, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let msg_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    match msg_type {
        "connection" => Ok(FeedMessage::Connection {
            message: value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        "tracking_update" => {
            let entity = normalize_object(&value, None)?;
            Ok(FeedMessage::TrackingUpdate(entity))
        }
        "event" => {
            let snapshot_url = value
                .get("snapshot_url")
                .and_then(Value::as_str)
                .map(str::to_string);
            let description = value
                .get("event_description")
                .and_then(Value::as_str)
                .map(str::to_string);
            let explicit = value.get("track_ended").and_then(Value::as_bool);

            if indicates_track_end(explicit, description.as_deref()) {
                return Ok(FeedMessage::TrackEnded {
                    entity_id: object_id(&value)?,
                    description,
                });
            }

            let entity = normalize_object(&value, snapshot_url)?;
            Ok(FeedMessage::Event {
                entity,
                description,
            })
        }
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

/// An explicit flag always wins; otherwise fall back to the description text
pub fn indicates_track_end(explicit: Option<bool>, description: Option<&str>) -> bool {
    if let Some(flag) = explicit {
        return flag;
    }

    match description {
        Some(text) => {
            let text = text.to_ascii_lowercase();
            TRACK_END_PHRASES.iter().any(|phrase| text.contains(phrase))
        }
        None => false,
    }
}

/// Id of the `object` payload, without validating the rest of it
fn object_id(message: &Value) -> Result<String, DecodeError> {
    let object = match message.get("object") {
        Some(Value::Null) | None => return Err(DecodeError::MissingObject),
        Some(object) => object,
    };

    match object.get("id").and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
        _ => Err(DecodeError::MissingField("id")),
    }
}

fn normalize_object(
    message: &Value,
    snapshot_url: Option<String>,
) -> Result<TrackedEntity, DecodeError> {
    let object = match message.get("object") {
        Some(Value::Null) | None => return Err(DecodeError::MissingObject),
        Some(object) => object.clone(),
    };

    let wire: WireObject =
        serde_json::from_value(object).map_err(|e| DecodeError::InvalidObject(e.to_string()))?;

    if wire.id.trim().is_empty() {
        return Err(DecodeError::MissingField("id"));
    }

    if !valid_coordinates(wire.latitude, wire.longitude) {
        return Err(DecodeError::InvalidCoordinates {
            latitude: wire.latitude,
            longitude: wire.longitude,
        });
    }

    let last_update_at = parse_timestamp(&wire.timestamp)?;

    let mut metadata = wire.metadata.unwrap_or_default();
    let confidence = metadata.remove("confidence").and_then(|v| v.as_f64());
    let detection_count = metadata.remove("detection_count").and_then(|v| v.as_u64());
    let source_id = metadata.remove("camera_id").and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(TrackedEntity {
        id: wire.id,
        kind: wire.kind,
        position: Position {
            latitude: wire.latitude,
            longitude: wire.longitude,
            altitude: wire.altitude.filter(|a| a.is_finite()),
        },
        last_update_at,
        // Stamped by the store on upsert
        received_at: 0,
        source_id,
        attributes: EntityAttributes {
            display_name: wire.name.filter(|n| !n.is_empty()),
            confidence,
            speed: wire.speed,
            direction: wire.direction,
            detection_count,
            snapshot_url,
            metadata,
        },
    })
}

fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// ISO-8601 to epoch milliseconds; timestamps without an offset are UTC
pub fn parse_timestamp(value: &str) -> Result<i64, DecodeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp_millis());
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc().timestamp_millis())
        .map_err(|_| DecodeError::InvalidTimestamp(value.to_string()))
}
