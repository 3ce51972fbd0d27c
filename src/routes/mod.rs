// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::history_repo::HistoryRepo;
use crate::models::{Broadcast, UtilizationSnapshot};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) broadcast_tx: broadcast::Sender<Broadcast>,
    pub(crate) write_tx: mpsc::Sender<UtilizationSnapshot>,
    pub(crate) history_repo: Arc<HistoryRepo>,
    pub(crate) ws_connections: Arc<AtomicUsize>,
    pub(crate) config: AppConfig,
}

pub fn app(
    broadcast_tx: broadcast::Sender<Broadcast>,
    write_tx: mpsc::Sender<UtilizationSnapshot>,
    history_repo: Arc<HistoryRepo>,
    ws_connections: Arc<AtomicUsize>,
    config: AppConfig,
) -> Router {
    let state = AppState {
        broadcast_tx,
        write_tx,
        history_repo,
        ws_connections,
        config,
    };
    Router::new()
        .route("/", get(|| async { "scaler-dashboard: ok" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/snapshots", get(http::get_snapshots)) // GET /api/snapshots?start=RFC3339
        .route("/api/snapshots", post(http::ingest_snapshots)) // POST /api/snapshots
        .route("/api/scale-status", post(http::ingest_scale_status)) // POST /api/scale-status
        .route("/api/snapshots/aggregated", get(http::get_aggregated)) // GET /api/snapshots/aggregated?start=RFC3339
        .route("/ws", get(ws::ws_feed)) // WS /ws
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
