use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Feed connection configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Open the feed as soon as the client starts
    #[serde(default = "default_connect_on_start")]
    pub connect_on_start: bool,
}

fn default_url() -> String {
    std::env::var("FEED_URL").unwrap_or_else(|_| "ws://localhost:8765/ws".to_string())
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_connect_on_start() -> bool {
    true
}

impl FeedConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_on_start: default_connect_on_start(),
        }
    }
}
