use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the track history store
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Persist observations at all
    pub enabled: bool,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Logical store name (recorded in the store metadata table)
    pub store_name: String,

    /// Expected schema version; older stores are upgraded on open
    pub schema_version: u32,

    /// Records older than this many days are purged by the daily sweep
    pub retention_days: u32,

    /// Pending observation jobs before new ones are dropped
    pub queue_capacity: usize,

    /// Maximum jobs committed per transaction
    pub batch_size: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: PathBuf::from("twintrack.db"),
            store_name: "tracking_history".to_string(),
            schema_version: super::store::SCHEMA_VERSION,
            retention_days: 7,
            queue_capacity: 4096,
            batch_size: 256,
        }
    }
}
