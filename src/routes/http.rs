// GET/POST handlers: version, snapshot pull queries, snapshot ingest

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::AppState;
use crate::aggregation::{self, CHART_METRICS};
use crate::models::{Broadcast, ScaleStatus, UtilizationSnapshot, to_chart_points};
use crate::version::{NAME, VERSION};

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct SnapshotsQuery {
    /// RFC3339 start of the query window; defaults to now.
    start: Option<String>,
}

fn parse_start(query: &SnapshotsQuery) -> Result<DateTime<Utc>, (StatusCode, String)> {
    match &query.start {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("Invalid start date format: {}", e),
                )
            }),
    }
}

/// History since the start cutoff plus plan-ahead predictions, ascending.
async fn fetch_snapshots(
    state: &AppState,
    start: DateTime<Utc>,
) -> Result<Vec<UtilizationSnapshot>, (StatusCode, String)> {
    let mut snapshots = state
        .history_repo
        .get_snapshots_since(start)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to retrieve snapshots: {}", e),
            )
        })?;
    let plan_ahead = Duration::seconds(state.config.publishing.plan_ahead_secs as i64);
    let predictions = state
        .history_repo
        .get_prediction_snapshots(plan_ahead)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to retrieve predictions: {}", e),
            )
        })?;
    snapshots.extend(predictions);
    Ok(snapshots)
}

/// GET /api/snapshots?start=RFC3339 — raw snapshot list for the charts.
pub(super) async fn get_snapshots(
    State(state): State<AppState>,
    Query(query): Query<SnapshotsQuery>,
) -> Result<Json<Vec<UtilizationSnapshot>>, (StatusCode, String)> {
    let start = parse_start(&query)?;
    let snapshots = fetch_snapshots(&state, start).await?;
    Ok(Json(snapshots))
}

/// GET /api/snapshots/aggregated?start=RFC3339 — the same list run through
/// the adaptive time-bucketing aggregator with the configured intervals.
/// Aggregation failure is a visible 500, never a silently thinned chart.
pub(super) async fn get_aggregated(
    State(state): State<AppState>,
    Query(query): Query<SnapshotsQuery>,
) -> Result<Json<Vec<aggregation::ChartPoint>>, (StatusCode, String)> {
    let start = parse_start(&query)?;
    let snapshots = fetch_snapshots(&state, start).await?;
    let points = to_chart_points(&snapshots);
    let charting = &state.config.charting;
    let aggregated = aggregation::aggregate(
        &points,
        &CHART_METRICS,
        charting.coarse_interval_ms,
        charting.fine_interval_ms,
        charting.recency_window_ms,
    )
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to aggregate snapshots: {}", e),
        )
    })?;
    Ok(Json(aggregated))
}

/// Ingest body: a single snapshot or a full batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum IngestBody {
    One(UtilizationSnapshot),
    Many(Vec<UtilizationSnapshot>),
}

/// POST /api/snapshots — push ingest from the autoscaler. Snapshots are
/// queued for the history writer and re-broadcast to WebSocket subscribers.
pub(super) async fn ingest_snapshots(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let snapshots = match body {
        IngestBody::One(s) => vec![s],
        IngestBody::Many(v) => v,
    };
    if snapshots.is_empty() {
        return Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "accepted": 0 }))));
    }

    for snapshot in &snapshots {
        if state.write_tx.send(snapshot.clone()).await.is_err() {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "history writer is shutting down".into(),
            ));
        }
    }

    // Batches go out as one message; single updates keep the snapshot /
    // prediction distinction the UI switches on. No receivers is fine.
    let message = match snapshots.as_slice() {
        [only] if only.future_value => Broadcast::Prediction(only.clone()),
        [only] => Broadcast::Snapshot(only.clone()),
        _ => Broadcast::Snapshots(snapshots.clone()),
    };
    let _ = state.broadcast_tx.send(message);

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": snapshots.len() })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum ScaleDirection {
    Out,
    In,
}

/// Scale status push: direction plus the cooldown state fields.
#[derive(Debug, Deserialize)]
pub(super) struct ScaleStatusBody {
    direction: ScaleDirection,
    #[serde(flatten)]
    status: ScaleStatus,
}

/// POST /api/scale-status — push from the autoscaler whenever a scale-out or
/// scale-in starts or its cooldown changes. Fan-out only; status is not
/// persisted.
pub(super) async fn ingest_scale_status(
    State(state): State<AppState>,
    Json(body): Json<ScaleStatusBody>,
) -> impl IntoResponse {
    let message = match body.direction {
        ScaleDirection::Out => Broadcast::ScaleOutStatus(body.status),
        ScaleDirection::In => Broadcast::ScaleInStatus(body.status),
    };
    let _ = state.broadcast_tx.send(message);
    StatusCode::ACCEPTED
}
