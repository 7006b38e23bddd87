// Integration tests for the live query and history HTTP APIs.
//
// Routers are driven in-process with tower::ServiceExt::oneshot; no socket
// is bound.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;
use twintrack::api::{
    create_history_router, create_query_router, HistoryAppState, QueryAppState,
};
use twintrack::diagnostics::{DiagnosticCategory, DiagnosticLog};
use twintrack::persistence::{HistoryStore, ObjectRecord, TrackPoint};
use twintrack::state::{
    ConnectionStatus, EntityAttributes, EntityKind, Position, TrackedEntity, TrackingStore,
};

fn entity(id: &str, kind: EntityKind, lat: f64, ts: i64, source: &str) -> TrackedEntity {
    TrackedEntity {
        id: id.to_string(),
        kind,
        position: Position {
            latitude: lat,
            longitude: 10.0,
            altitude: None,
        },
        last_update_at: ts,
        received_at: 0,
        source_id: Some(source.to_string()),
        attributes: EntityAttributes {
            display_name: Some(format!("{} name", id)),
            ..Default::default()
        },
    }
}

fn query_app() -> (Router, Arc<TrackingStore>, Arc<DiagnosticLog>) {
    let store = Arc::new(TrackingStore::new(100));
    let diagnostics = Arc::new(DiagnosticLog::new(50));
    let app = create_query_router(Arc::new(QueryAppState {
        store: Arc::clone(&store),
        diagnostics: Arc::clone(&diagnostics),
        client: None,
    }));
    (app, store, diagnostics)
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ── live state ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_entities_with_filters() {
    let (app, store, _) = query_app();
    store.upsert(entity("A", EntityKind::Person, 1.0, 1_000, "cam-1"));
    store.upsert(entity("B", EntityKind::Vehicle, 2.0, 1_000, "cam-1"));
    store.upsert(entity("C", EntityKind::Vehicle, 3.0, 1_000, "cam-2"));

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/entities"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let ids: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["A", "B", "C"]);

    let response = app
        .oneshot(request(Method::GET, "/api/entities?kind=vehicle&source=cam-2"))
        .await
        .unwrap();
    let json = json_body(response).await;
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], "C");
    assert_eq!(list[0]["kind"], "vehicle");
}

#[tokio::test]
async fn test_get_entity_includes_path() {
    let (app, store, _) = query_app();
    store.upsert(entity("A", EntityKind::Person, 1.0, 1_000, "cam-1"));
    store.upsert(entity("A", EntityKind::Person, 1.5, 2_000, "cam-1"));

    let response = app
        .oneshot(request(Method::GET, "/api/entities/A"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["id"], "A");
    assert_eq!(json["position"]["latitude"], 1.5);
    let path = json["path"].as_array().unwrap();
    assert_eq!(path.len(), 2);
    assert_eq!(path[0]["timestamp"], 1_000);
    assert_eq!(path[1]["timestamp"], 2_000);
}

#[tokio::test]
async fn test_get_unknown_entity_returns_404() {
    let (app, _, _) = query_app();

    let response = app
        .oneshot(request(Method::GET, "/api/entities/ghost"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"], "Entity not found");
}

#[tokio::test]
async fn test_paths_and_clear() {
    let (app, store, _) = query_app();
    store.upsert(entity("A", EntityKind::Person, 1.0, 1_000, "cam-1"));
    store.upsert(entity("B", EntityKind::Wildlife, 2.0, 1_000, "cam-1"));

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/paths"))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json.as_object().unwrap().len(), 2);
    assert_eq!(json["B"].as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(request(Method::DELETE, "/api/entities"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["removed"], 2);
    assert!(store.is_empty());

    let response = app
        .oneshot(request(Method::GET, "/api/paths"))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert!(json.as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_status_without_client() {
    let (app, store, _) = query_app();
    store.upsert(entity("A", EntityKind::Person, 1.0, 1_000, "cam-1"));
    store.set_connection_status(ConnectionStatus::Error);

    let response = app
        .oneshot(request(Method::GET, "/api/status"))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["entity_count"], 1);
    assert!(json.get("state").is_none());
    assert!(json.get("feed_url").is_none());
}

#[tokio::test]
async fn test_recent_diagnostics_limit() {
    let (app, _, diagnostics) = query_app();
    for i in 0..5 {
        diagnostics.record(DiagnosticCategory::Message, format!("message {}", i));
    }

    let response = app
        .oneshot(request(Method::GET, "/api/diagnostics?limit=2"))
        .await
        .unwrap();
    let json = json_body(response).await;
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["message"], "message 3");
    assert_eq!(entries[1]["message"], "message 4");
    assert_eq!(entries[1]["category"], "message");
}

// ── history ──────────────────────────────────────────────────────────────────

fn history_app() -> (Router, Arc<HistoryStore>) {
    let history = Arc::new(HistoryStore::open_in_memory("tracking_history").unwrap());
    let app = create_history_router(Arc::new(HistoryAppState {
        history: Arc::clone(&history),
    }));
    (app, history)
}

fn persist(history: &HistoryStore, entity: &TrackedEntity) {
    history
        .upsert_object_record(&ObjectRecord::from(entity))
        .unwrap();
    history
        .append_track_points(&[TrackPoint::from(entity)])
        .unwrap();
}

#[tokio::test]
async fn test_history_ranged_query() {
    let (app, history) = history_app();
    for ts in [1_000, 2_000, 3_000, 4_000] {
        persist(&history, &entity("A", EntityKind::Vehicle, 1.0, ts, "cam-1"));
    }

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/history/A?from=2000&to=3000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["entity_id"], "A");
    assert_eq!(json["record"]["first_seen_at"], 1_000);
    assert_eq!(json["record"]["last_seen_at"], 4_000);
    let timestamps: Vec<i64> = json["points"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["timestamp"].as_i64().unwrap())
        .collect();
    assert_eq!(timestamps, vec![2_000, 3_000]);

    let response = app
        .oneshot(request(Method::GET, "/api/history/A"))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["points"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_history_unknown_entity_is_empty() {
    let (app, _) = history_app();

    let response = app
        .oneshot(request(Method::GET, "/api/history/ghost"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert!(json.get("record").is_none());
    assert!(json["points"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_history_inverted_range_is_rejected() {
    let (app, _) = history_app();

    let response = app
        .oneshot(request(Method::GET, "/api/history/A?from=5000&to=1000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_history_lists_objects_most_recent_first() {
    let (app, history) = history_app();
    persist(&history, &entity("old", EntityKind::Person, 1.0, 1_000, "cam-1"));
    persist(&history, &entity("new", EntityKind::Person, 1.0, 9_000, "cam-1"));

    let response = app
        .oneshot(request(Method::GET, "/api/history"))
        .await
        .unwrap();
    let json = json_body(response).await;
    let ids: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["new", "old"]);
}
