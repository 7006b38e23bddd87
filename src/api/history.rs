use crate::persistence::{HistoryStore, ObjectRecord, TrackPoint};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Shared state for history API
pub struct HistoryAppState {
    pub history: Arc<HistoryStore>,
}

/// Query parameters for persisted paths
#[derive(Deserialize)]
pub struct HistoryParams {
    /// Inclusive lower bound, epoch milliseconds
    pub from: Option<i64>,
    /// Inclusive upper bound, epoch milliseconds
    pub to: Option<i64>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ObjectRecord>,
    pub points: Vec<TrackPoint>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create history API router
pub fn create_history_router(state: Arc<HistoryAppState>) -> Router {
    Router::new()
        .route("/api/history", get(list_objects))
        .route("/api/history/:id", get(get_history))
        .with_state(state)
}

/// GET /api/history - Persisted object summaries, most recently seen first
async fn list_objects(State(state): State<Arc<HistoryAppState>>) -> Response {
    let history = Arc::clone(&state.history);
    match tokio::task::spawn_blocking(move || history.object_records()).await {
        Ok(Ok(records)) => Json(records).into_response(),
        Ok(Err(e)) => internal_error(e.to_string()),
        Err(e) => internal_error(e.to_string()),
    }
}

/// GET /api/history/:id?from=T&to=T
///
/// Returns the persisted path for an entity, oldest first. Omitted bounds
/// cover the full time axis.
async fn get_history(
    State(state): State<Arc<HistoryAppState>>,
    Path(entity_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response {
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "`from` must not be after `to`".to_string(),
                }),
            )
                .into_response();
        }
    }

    let history = Arc::clone(&state.history);
    let id = entity_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        let record = history.object_record(&id)?;
        let points = history.query_path(&id, params.from, params.to)?;
        anyhow::Ok((record, points))
    })
    .await;

    match result {
        Ok(Ok((record, points))) => Json(HistoryResponse {
            entity_id,
            record,
            points,
        })
        .into_response(),
        Ok(Err(e)) => internal_error(format!("{:#}", e)),
        Err(e) => internal_error(e.to_string()),
    }
}

fn internal_error(message: String) -> Response {
    error!(error = %message, "History query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "History query failed".to_string(),
        }),
    )
        .into_response()
}
