// Configuration loading
pub mod config;

// Operator diagnostic log
pub mod diagnostics;

// Live tracking state and snapshots
pub mod state;

// Stale entity eviction
pub mod monitor;

// Durable track history
pub mod persistence;

// Feed stream client
pub mod feed;

// HTTP and WebSocket APIs
pub mod api;

pub use feed::StreamClient;
pub use state::{TrackedEntity, TrackingSnapshot, TrackingStore};
