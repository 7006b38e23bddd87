use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use twintrack::api::{
    create_feed_router, create_history_router, create_query_router, create_ws_router,
    FeedAppState, HistoryAppState, QueryAppState, WsAppState,
};
use twintrack::config::{load_config, TrackerConfig};
use twintrack::diagnostics::DiagnosticLog;
use twintrack::feed::{StreamClient, WebSocketTransport};
use twintrack::monitor::TimeoutMonitor;
use twintrack::persistence::{
    schedule_retention_sweep, HistoryStore, PersistenceQueue, PersistenceWriter, SCHEMA_VERSION,
};
use twintrack::state::TrackingStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twintrack=info".into()),
        )
        .init();

    info!("Twintrack starting...");

    let config_path =
        std::env::var("TWINTRACK_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        info!(path = %config_path, "Loading configuration");
        load_config(&config_path)?
    } else {
        info!(path = %config_path, "Config file not found, using defaults");
        TrackerConfig::default()
    };

    let diagnostics = Arc::new(DiagnosticLog::new(config.diagnostics.capacity));
    let mut background = Vec::new();

    // History store and writer (optional)
    let mut store = TrackingStore::new(config.tracking.max_path_points);
    let mut history = None;
    if config.persistence.enabled {
        if config.persistence.schema_version != SCHEMA_VERSION {
            warn!(
                configured = config.persistence.schema_version,
                supported = SCHEMA_VERSION,
                "Configured schema version differs from this build"
            );
        }
        match HistoryStore::open(
            &config.persistence.database_path,
            &config.persistence.store_name,
        ) {
            Ok(opened) => {
                let opened = Arc::new(opened);
                let (queue, rx) = PersistenceQueue::bounded(config.persistence.queue_capacity);
                background.push(
                    PersistenceWriter::new(
                        Arc::clone(&opened),
                        Arc::clone(&diagnostics),
                        config.persistence.batch_size,
                    )
                    .spawn(rx),
                );
                background.push(schedule_retention_sweep(
                    Arc::clone(&opened),
                    config.persistence.retention_days,
                    Arc::clone(&diagnostics),
                ));
                store = store.with_persistence(queue);
                history = Some(opened);
                info!(
                    path = %config.persistence.database_path.display(),
                    retention_days = config.persistence.retention_days,
                    "Track history enabled"
                );
            }
            // Live tracking keeps working without history
            Err(e) => warn!(error = %e, "Failed to open history store, persistence disabled"),
        }
    }
    let store = Arc::new(store);

    // Timeout monitor
    background.push(
        TimeoutMonitor::new(
            Arc::clone(&store),
            Arc::clone(&diagnostics),
            config.tracking.stale_after(),
            config.tracking.sweep_interval(),
        )
        .spawn(),
    );

    // Feed client
    let client = Arc::new(StreamClient::spawn(
        config.feed.clone(),
        WebSocketTransport,
        Arc::clone(&store),
        Arc::clone(&diagnostics),
    ));
    if config.feed.connect_on_start {
        client.connect();
    }

    // HTTP/WebSocket API
    let mut app = create_query_router(Arc::new(QueryAppState {
        store: Arc::clone(&store),
        diagnostics: Arc::clone(&diagnostics),
        client: Some(Arc::clone(&client)),
    }))
    .merge(create_feed_router(Arc::new(FeedAppState {
        client: Arc::clone(&client),
    })))
    .merge(create_ws_router(Arc::new(WsAppState {
        store: Arc::clone(&store),
        diagnostics: Arc::clone(&diagnostics),
    })));
    if let Some(history) = history {
        app = app.merge(create_history_router(Arc::new(HistoryAppState { history })));
    }
    let app = app.layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_address))?;
    info!(address = %config.api.bind_address, "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("API server failed")?;

    // In-flight persistence is not awaited
    client.shutdown();
    for handle in background {
        handle.abort();
    }

    info!("Twintrack stopped");
    Ok(())
}
