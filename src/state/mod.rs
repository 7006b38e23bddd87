// Tracking state: live entities, bounded paths, immutable snapshots

mod entity;
mod path;
mod snapshot;
mod store;

pub use entity::{EntityAttributes, EntityKind, Position, TrackedEntity};
pub use path::{Path, PathPoint};
pub use snapshot::{ConnectionStatus, TrackingSnapshot};
pub use store::{ChangeEvent, TrackingStore};

#[cfg(test)]
mod tests;
