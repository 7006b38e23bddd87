use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::entity::TrackedEntity;

/// Position sample on a movement trail
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Unix epoch milliseconds
    pub timestamp: i64,
}

impl From<&TrackedEntity> for PathPoint {
    fn from(entity: &TrackedEntity) -> Self {
        Self {
            latitude: entity.position.latitude,
            longitude: entity.position.longitude,
            altitude: entity.position.altitude,
            timestamp: entity.last_update_at,
        }
    }
}

/// Bounded trail of recent positions for one entity, oldest first.
///
/// The bound is enforced on every push; the oldest points are dropped first.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Path {
    pub entity_id: String,
    points: VecDeque<PathPoint>,
    #[serde(skip)]
    max_points: usize,
}

impl Path {
    /// Create an empty path. A bound of zero is treated as one.
    pub fn new(entity_id: impl Into<String>, max_points: usize) -> Self {
        let max_points = max_points.max(1);
        Self {
            entity_id: entity_id.into(),
            points: VecDeque::with_capacity(max_points.min(64)),
            max_points,
        }
    }

    /// Append a point, trimming from the front to stay within the bound
    pub fn push(&mut self, point: PathPoint) {
        self.points.push_back(point);
        while self.points.len() > self.max_points {
            self.points.pop_front();
        }
    }

    pub fn points(&self) -> impl ExactSizeIterator<Item = &PathPoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_vec(&self) -> Vec<PathPoint> {
        self.points.iter().copied().collect()
    }
}
