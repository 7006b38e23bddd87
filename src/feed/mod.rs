//! Streaming client for the live position feed.
//!
//! Owns one connection at a time, decodes inbound JSON frames into typed
//! updates for the tracking store, and reconnects with a bounded retry
//! budget.

mod client;
pub mod config;
pub mod machine;
pub mod protocol;
pub mod transport;


pub use client::StreamClient;
pub use config::FeedConfig;
pub use machine::{ConnectionEvent, ConnectionState, Effect, ReconnectMachine, RetryPolicy};
pub use protocol::{decode, DecodeError, FeedMessage};
pub use transport::{FeedConnection, FeedFrame, FeedTransport, WebSocketTransport};
