use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// Re-export per-component config types
pub use crate::feed::FeedConfig;
pub use crate::persistence::PersistenceConfig;

/// Complete tracker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Live state bounds and eviction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Points retained per entity path
    #[serde(default = "default_max_path_points")]
    pub max_path_points: usize,
    /// Entities silent for longer than this are evicted
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,
    /// How often the timeout monitor sweeps
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_max_path_points() -> usize {
    100
}

fn default_stale_after_seconds() -> u64 {
    30
}

fn default_sweep_interval_seconds() -> u64 {
    5
}

impl TrackingConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_path_points: default_max_path_points(),
            stale_after_seconds: default_stale_after_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

/// Operator diagnostic log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_diagnostics_capacity")]
    pub capacity: usize,
}

fn default_diagnostics_capacity() -> usize {
    500
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            capacity: default_diagnostics_capacity(),
        }
    }
}

/// HTTP/WebSocket API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TrackerConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: TrackerConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.feed.reconnect_delay_ms, 3000);
        assert_eq!(config.feed.max_reconnect_attempts, 10);
        assert_eq!(config.tracking.max_path_points, 100);
        assert_eq!(config.tracking.stale_after_seconds, 30);
        assert_eq!(config.persistence.retention_days, 7);
        assert_eq!(config.persistence.schema_version, 1);
        assert_eq!(config.diagnostics.capacity, 500);
        assert_eq!(config.api.bind_address, "0.0.0.0:3000");
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [feed]
            url = "ws://feed.example.com:8765/ws"
            reconnect_delay_ms = 500
            max_reconnect_attempts = 4
            connect_on_start = false

            [tracking]
            max_path_points = 3
            stale_after_seconds = 12
            sweep_interval_seconds = 2

            [persistence]
            enabled = false
            database_path = "/tmp/history.db"
            store_name = "site_a"
            retention_days = 30

            [diagnostics]
            capacity = 50

            [api]
            bind_address = "127.0.0.1:8080"
        "#;

        let config: TrackerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.feed.url, "ws://feed.example.com:8765/ws");
        assert_eq!(config.feed.reconnect_delay(), Duration::from_millis(500));
        assert_eq!(config.feed.max_reconnect_attempts, 4);
        assert!(!config.feed.connect_on_start);
        assert_eq!(config.tracking.max_path_points, 3);
        assert_eq!(config.tracking.stale_after(), Duration::from_secs(12));
        assert!(!config.persistence.enabled);
        assert_eq!(config.persistence.store_name, "site_a");
        assert_eq!(config.persistence.retention_days, 30);
        // Unset fields in a present section keep their defaults
        assert_eq!(config.persistence.batch_size, 256);
        assert_eq!(config.diagnostics.capacity, 50);
        assert_eq!(config.api.bind_address, "127.0.0.1:8080");
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [tracking]
            stale_after_seconds = 60
        "#;

        let config: TrackerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.tracking.stale_after_seconds, 60);
        assert_eq!(config.tracking.max_path_points, 100); // Default
        assert_eq!(config.feed.max_reconnect_attempts, 10); // Default
        assert!(config.persistence.enabled); // Default
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feed]\nmax_reconnect_attempts = 2").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.feed.max_reconnect_attempts, 2);

        assert!(load_config("/nonexistent/twintrack.toml").is_err());
    }
}
