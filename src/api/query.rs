use crate::diagnostics::{DiagnosticEntry, DiagnosticLog};
use crate::feed::{ConnectionState, StreamClient};
use crate::state::{ConnectionStatus, PathPoint, TrackedEntity, TrackingStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared state for the live-state query API
pub struct QueryAppState {
    pub store: Arc<TrackingStore>,
    pub diagnostics: Arc<DiagnosticLog>,
    pub client: Option<Arc<StreamClient>>,
}

/// Query parameters for entity listing
#[derive(Deserialize)]
pub struct EntityQueryParams {
    /// Filter by classification (e.g. ?kind=person)
    pub kind: Option<String>,
    /// Filter by reporting sensor
    pub source: Option<String>,
}

/// Entity with its current trail
#[derive(Serialize)]
pub struct EntityDetailResponse {
    #[serde(flatten)]
    pub entity: TrackedEntity,
    pub path: Vec<PathPoint>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ConnectionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    pub entity_count: usize,
    pub version: u64,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

#[derive(Deserialize)]
pub struct DiagnosticsParams {
    pub limit: Option<usize>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create query API router
pub fn create_query_router(state: Arc<QueryAppState>) -> Router {
    Router::new()
        .route("/api/entities", get(list_entities).delete(clear_entities))
        .route("/api/entities/:id", get(get_entity))
        .route("/api/paths", get(list_paths))
        .route("/api/status", get(get_status))
        .route("/api/diagnostics", get(list_diagnostics))
        .with_state(state)
}

/// GET /api/entities - List live entities
///
/// Query parameters (combined with AND):
/// - `kind`: classification, e.g. ?kind=vehicle
/// - `source`: reporting sensor, e.g. ?source=cam-3
async fn list_entities(
    State(state): State<Arc<QueryAppState>>,
    Query(params): Query<EntityQueryParams>,
) -> Json<Vec<TrackedEntity>> {
    let snapshot = state.store.snapshot();

    let mut entities: Vec<TrackedEntity> = snapshot
        .entities()
        .values()
        .filter(|entity| {
            if let Some(ref kind) = params.kind {
                if entity.kind.as_str() != kind {
                    return false;
                }
            }
            if let Some(ref source) = params.source {
                if entity.source_id.as_deref() != Some(source.as_str()) {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect();
    entities.sort_by(|a, b| a.id.cmp(&b.id));

    Json(entities)
}

/// GET /api/entities/:id - Entity plus its trail
async fn get_entity(
    State(state): State<Arc<QueryAppState>>,
    Path(id): Path<String>,
) -> Result<Json<EntityDetailResponse>, QueryError> {
    // One snapshot so entity and path agree
    let snapshot = state.store.snapshot();
    let entity = snapshot.entity(&id).cloned().ok_or(QueryError::NotFound)?;
    let path = snapshot.path(&id).map(|p| p.to_vec()).unwrap_or_default();

    Ok(Json(EntityDetailResponse { entity, path }))
}

/// DELETE /api/entities - Administrative reset of live state
async fn clear_entities(State(state): State<Arc<QueryAppState>>) -> Json<ClearResponse> {
    let removed = state.store.clear();
    Json(ClearResponse { removed })
}

/// GET /api/paths - Trails for every live entity
async fn list_paths(
    State(state): State<Arc<QueryAppState>>,
) -> Json<HashMap<String, Vec<PathPoint>>> {
    let snapshot = state.store.snapshot();
    let paths = snapshot
        .paths()
        .iter()
        .map(|(id, path)| (id.clone(), path.to_vec()))
        .collect();
    Json(paths)
}

/// GET /api/status - Feed indicator and entity count
async fn get_status(State(state): State<Arc<QueryAppState>>) -> Json<StatusResponse> {
    let snapshot = state.store.snapshot();
    Json(StatusResponse {
        status: snapshot.connection_status(),
        state: state.client.as_ref().map(|c| c.state()),
        feed_url: state.client.as_ref().map(|c| c.url().to_string()),
        entity_count: snapshot.len(),
        version: snapshot.version(),
    })
}

/// GET /api/diagnostics?limit=N - Recent diagnostic entries, oldest first
async fn list_diagnostics(
    State(state): State<Arc<QueryAppState>>,
    Query(params): Query<DiagnosticsParams>,
) -> Json<Vec<DiagnosticEntry>> {
    let limit = params.limit.unwrap_or(100);
    Json(state.diagnostics.recent(limit))
}

/// Query error types
#[derive(Debug)]
enum QueryError {
    NotFound,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            QueryError::NotFound => (StatusCode::NOT_FOUND, "Entity not found"),
        };

        let body = Json(ErrorResponse {
            error: error_message.to_string(),
        });

        (status, body).into_response()
    }
}
