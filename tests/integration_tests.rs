// Integration tests: HTTP and WebSocket endpoints

mod common;

use axum_test::TestServer;
use chrono::Utc;
use common::snapshot_at;
use scaler_dashboard::config::AppConfig;
use scaler_dashboard::history_repo::HistoryRepo;
use scaler_dashboard::models::{Broadcast, UtilizationSnapshot};
use scaler_dashboard::routes;
use scaler_dashboard::worker::{HistoryWriterConfig, spawn_history_writer, writer_channel_capacity};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize};
use tempfile::TempDir;
use tokio::sync::broadcast;

const TEST_CONFIG: &str = r#"
[server]
port = 8041
host = "0.0.0.0"

[database]
path = "data/test.db"
max_pool_size = 2
flush_rate = 1
flush_interval_secs = 1

[charting]
coarse_interval_ms = 300000
fine_interval_ms = 10000
recency_window_ms = 900000

[publishing]
broadcast_capacity = 10
plan_ahead_secs = 600

[monitoring]
stats_log_interval_secs = 60
prune_interval_secs = 300
"#;

struct TestApp {
    app: axum::Router,
    broadcast_tx: broadcast::Sender<Broadcast>,
    repo: Arc<HistoryRepo>,
    // Holds the database file for the test's lifetime.
    _dir: TempDir,
}

async fn test_app() -> TestApp {
    let config = AppConfig::load_from_str(TEST_CONFIG).unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let repo = Arc::new(
        HistoryRepo::connect(
            path.to_str().unwrap(),
            config.database.max_pool_size,
            config.database.retention_days,
        )
        .await
        .unwrap(),
    );
    repo.init().await.unwrap();

    let (broadcast_tx, _) = broadcast::channel(config.publishing.broadcast_capacity);
    let (write_tx, write_rx) =
        tokio::sync::mpsc::channel(writer_channel_capacity(config.database.flush_rate));
    spawn_history_writer(
        write_rx,
        repo.clone(),
        HistoryWriterConfig {
            flush_rate: config.database.flush_rate,
            flush_interval_secs: config.database.flush_interval_secs,
        },
        Arc::new(AtomicU64::new(0)),
    );

    let app = routes::app(
        broadcast_tx.clone(),
        write_tx,
        repo.clone(),
        Arc::new(AtomicUsize::new(0)),
        config,
    );
    TestApp {
        app,
        broadcast_tx,
        repo,
        _dir: dir,
    }
}

/// Poll the repo until the expected row count lands (writes flush async).
async fn wait_for_rows(repo: &HistoryRepo, expected: usize) {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    loop {
        let rows = repo.get_snapshots_since(Utc::now()).await.unwrap();
        if rows.len() >= expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {expected} rows"
        );
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_root_endpoint() {
    let t = test_app().await;
    let server = TestServer::new(t.app).unwrap();
    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("scaler-dashboard: ok");
}

#[tokio::test]
async fn test_version_endpoint() {
    let t = test_app().await;
    let server = TestServer::new(t.app).unwrap();
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(
        json.get("name").and_then(|v| v.as_str()),
        Some("scaler-dashboard")
    );
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_post_then_get_snapshots_roundtrip() {
    let t = test_app().await;
    let server = TestServer::new(t.app).unwrap();

    let snapshot = snapshot_at(Utc::now().timestamp_millis() - 60_000);
    let response = server.post("/api/snapshots").json(&snapshot).await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body.get("accepted").and_then(|v| v.as_u64()), Some(1));

    wait_for_rows(&t.repo, 1).await;
    let response = server.get("/api/snapshots").await;
    response.assert_status_ok();
    let snapshots: Vec<UtilizationSnapshot> = response.json();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].cluster_name, "test-cluster");
}

#[tokio::test]
async fn test_post_batch_counts_all_snapshots() {
    let t = test_app().await;
    let server = TestServer::new(t.app).unwrap();

    let now_ms = Utc::now().timestamp_millis();
    let batch = vec![snapshot_at(now_ms - 120_000), snapshot_at(now_ms - 60_000)];
    let response = server.post("/api/snapshots").json(&batch).await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body.get("accepted").and_then(|v| v.as_u64()), Some(2));

    wait_for_rows(&t.repo, 2).await;
}

#[tokio::test]
async fn test_get_snapshots_rejects_bad_start() {
    let t = test_app().await;
    let server = TestServer::new(t.app).unwrap();
    let response = server
        .get("/api/snapshots")
        .add_query_param("start", "yesterday-ish")
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_aggregated_endpoint_returns_chart_points() {
    let t = test_app().await;
    let server = TestServer::new(t.app).unwrap();

    let now_ms = Utc::now().timestamp_millis();
    let batch = vec![
        snapshot_at(now_ms - 120_000),
        snapshot_at(now_ms - 60_000),
        snapshot_at(now_ms),
    ];
    server.post("/api/snapshots").json(&batch).await;
    wait_for_rows(&t.repo, 3).await;

    let response = server.get("/api/snapshots/aggregated").await;
    response.assert_status_ok();
    let points: serde_json::Value = response.json();
    let points = points.as_array().expect("array of chart points");
    // All three are within the recency window, so each keeps its own bucket.
    assert_eq!(points.len(), 3);
    let metrics = points[0].get("metrics").expect("metrics map");
    // Writer counts toward the reader total: 2 + 1.
    assert_eq!(metrics.get("num_readers").and_then(|v| v.as_f64()), Some(3.0));
    assert_eq!(
        metrics.get("max_cpu_utilization").and_then(|v| v.as_f64()),
        Some(40.0)
    );
    assert_eq!(
        metrics.get("cluster_utilization").and_then(|v| v.as_f64()),
        Some(120.0)
    );
}

// --- WebSocket message tests (require http_transport + ws feature) ---
// Receive until we get a parseable broadcast (server sends an info
// welcome first and may interleave pings).

async fn receive_first_broadcast(ws: &mut axum_test::TestWebSocket) -> Broadcast {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    loop {
        let text = ws.receive_text().await;
        if let Ok(message) = serde_json::from_str::<Broadcast>(&text) {
            return message;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for broadcast"
        );
    }
}

#[tokio::test]
async fn test_ws_receives_ingested_snapshot() {
    let t = test_app().await;
    let server = TestServer::builder().http_transport().build(t.app).unwrap();

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let snapshot = snapshot_at(Utc::now().timestamp_millis());
    let tx = t.broadcast_tx.clone();
    let snapshot_clone = snapshot.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        let _ = tx.send(Broadcast::Snapshot(snapshot_clone));
    });

    let received = receive_first_broadcast(&mut ws).await;
    match received {
        Broadcast::Snapshot(s) => assert_eq!(s.cluster_name, "test-cluster"),
        other => panic!("expected snapshot broadcast, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ws_receives_scale_status_from_post() {
    let t = test_app().await;
    let server = TestServer::builder().http_transport().build(t.app).unwrap();

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let body = serde_json::json!({
        "direction": "out",
        "is_scaling": true,
        "last_scale": "2024-03-01T12:00:00Z",
        "timeout": 120,
    });
    let response = server.post("/api/scale-status").json(&body).await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);

    let received = receive_first_broadcast(&mut ws).await;
    match received {
        Broadcast::ScaleOutStatus(s) => {
            assert!(s.is_scaling);
            assert_eq!(s.timeout, 120);
        }
        other => panic!("expected scale-out status broadcast, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ws_receives_prediction_from_post() {
    let t = test_app().await;
    let server = TestServer::builder().http_transport().build(t.app).unwrap();

    let mut ws = server.get_websocket("/ws").await.into_websocket().await;
    let mut prediction = snapshot_at(Utc::now().timestamp_millis() + 300_000);
    prediction.future_value = true;
    prediction.predicted_value = true;

    let response = server.post("/api/snapshots").json(&prediction).await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);

    let received = receive_first_broadcast(&mut ws).await;
    match received {
        Broadcast::Prediction(p) => assert!(p.future_value),
        other => panic!("expected prediction broadcast, got {other:?}"),
    }
}
