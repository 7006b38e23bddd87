// HTTP and WebSocket APIs for map renderers, panels and operators

pub mod feed;
pub mod history;
pub mod query;
pub mod websocket;

pub use feed::{create_feed_router, FeedAppState};
pub use history::{create_history_router, HistoryAppState};
pub use query::{create_query_router, QueryAppState};
pub use websocket::{create_ws_router, ws_handler, WsAppState};
