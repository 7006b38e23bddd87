use crate::feed::{ConnectionState, StreamClient};
use crate::state::ConnectionStatus;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared state for feed control API
pub struct FeedAppState {
    pub client: Arc<StreamClient>,
}

#[derive(Serialize)]
pub struct FeedControlResponse {
    pub requested: &'static str,
    pub state: ConnectionState,
    pub status: ConnectionStatus,
}

/// Create feed control router
pub fn create_feed_router(state: Arc<FeedAppState>) -> Router {
    Router::new()
        .route("/api/feed/connect", post(connect))
        .route("/api/feed/disconnect", post(disconnect))
        .with_state(state)
}

/// POST /api/feed/connect - Open the feed (no-op if already connecting/connected)
async fn connect(State(state): State<Arc<FeedAppState>>) -> impl IntoResponse {
    info!("Feed connect requested via API");
    state.client.connect();
    accepted("connect", &state.client)
}

/// POST /api/feed/disconnect - Close the feed and cancel pending reconnects
async fn disconnect(State(state): State<Arc<FeedAppState>>) -> impl IntoResponse {
    info!("Feed disconnect requested via API");
    state.client.disconnect();
    accepted("disconnect", &state.client)
}

/// The command is applied asynchronously; the body reports the state at
/// the time of the request
fn accepted(requested: &'static str, client: &StreamClient) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(FeedControlResponse {
            requested,
            state: client.state(),
            status: client.status(),
        }),
    )
}
