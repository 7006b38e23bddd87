use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::entity::TrackedEntity;
use super::path::Path;

/// Tri-state feed indicator shown to operators
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }
}

/// Immutable view of the tracking state at one instant.
///
/// Maps are shared behind `Arc`; the store copies them on write only while a
/// reader still holds an older view, so a snapshot never changes after it is
/// handed out.
#[derive(Clone, Debug, Default)]
pub struct TrackingSnapshot {
    pub(crate) entities: Arc<HashMap<String, TrackedEntity>>,
    pub(crate) paths: Arc<HashMap<String, Arc<Path>>>,
    pub(crate) connection_status: ConnectionStatus,
    pub(crate) last_touched: Option<String>,
    pub(crate) version: u64,
}

impl TrackingSnapshot {
    pub fn entities(&self) -> &HashMap<String, TrackedEntity> {
        &self.entities
    }

    pub fn paths(&self) -> &HashMap<String, Arc<Path>> {
        &self.paths
    }

    pub fn entity(&self, id: &str) -> Option<&TrackedEntity> {
        self.entities.get(id)
    }

    pub fn path(&self, id: &str) -> Option<&Path> {
        self.paths.get(id).map(|p| p.as_ref())
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Id affected by the most recent entity mutation, if any
    pub fn last_touched(&self) -> Option<&str> {
        self.last_touched.as_deref()
    }

    /// Monotonic counter bumped on every published change
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
