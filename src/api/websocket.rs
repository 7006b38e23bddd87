use crate::diagnostics::{DiagnosticEntry, DiagnosticLog};
use crate::state::{ChangeEvent, TrackingStore};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Shared application state for WebSocket handler
pub struct WsAppState {
    pub store: Arc<TrackingStore>,
    pub diagnostics: Arc<DiagnosticLog>,
}

/// Server → Client push message
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PushMessage<'a> {
    Change { change: &'a ChangeEvent },
    Diagnostic { entry: &'a DiagnosticEntry },
}

/// Create WebSocket router
pub fn create_ws_router(state: Arc<WsAppState>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .with_state(state)
}

/// GET /api/ws - WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsAppState>>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Forward store deltas and diagnostic entries until the client leaves
async fn handle_socket(mut socket: WebSocket, state: Arc<WsAppState>) {
    let mut change_rx = state.store.subscribe();
    let mut diagnostic_rx = state.diagnostics.subscribe();

    info!("WebSocket connection established");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            error!(error = %e, "Failed to send pong");
                            break;
                        }
                    }
                    // Clients only listen
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            result = change_rx.recv() => {
                match result {
                    Ok(change) => {
                        if !send_json(&mut socket, &PushMessage::Change { change: &change }).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "WebSocket lagged, skipped changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("Change broadcast channel closed");
                        break;
                    }
                }
            }

            result = diagnostic_rx.recv() => {
                match result {
                    Ok(entry) => {
                        if !send_json(&mut socket, &PushMessage::Diagnostic { entry: &entry }).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "WebSocket lagged, skipped diagnostics");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

async fn send_json(socket: &mut WebSocket, message: &PushMessage<'_>) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to serialize push message");
            return true;
        }
    };

    if let Err(e) = socket.send(Message::Text(json)).await {
        error!(error = %e, "Failed to send push message");
        return false;
    }
    true
}
