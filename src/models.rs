// Wire types shared with the autoscaler and the dashboard UI.
// Snake_case JSON with RFC3339 timestamps, matching the existing contract.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregation::{CLUSTER_UTILIZATION, ChartPoint, MAX_CPU_UTILIZATION, NUM_READERS};

/// One utilization snapshot, observed or forecasted.
/// `future_value`: forecast lying after the present moment.
/// `predicted_value`: historical point used as forecast input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSnapshot {
    pub timestamp: DateTime<Utc>,
    pub num_readers: u32,
    pub max_cpu_utilization: f64,
    pub predicted_value: bool,
    pub future_value: bool,
    pub cluster_name: String,
}

impl UtilizationSnapshot {
    /// Chart form of this snapshot. Display adjustments happen here, once, at
    /// the boundary: the writer counts toward the reader total, and the
    /// derived load metric (utilization x readers) is precomputed because the
    /// aggregator only averages what it is told to track.
    pub fn to_chart_point(&self) -> ChartPoint {
        let readers = f64::from(self.num_readers + 1);
        let mut metrics = BTreeMap::new();
        metrics.insert(
            MAX_CPU_UTILIZATION.name.to_string(),
            self.max_cpu_utilization,
        );
        metrics.insert(NUM_READERS.name.to_string(), readers);
        metrics.insert(
            CLUSTER_UTILIZATION.name.to_string(),
            self.max_cpu_utilization * readers,
        );
        ChartPoint {
            timestamp: self.timestamp,
            metrics,
            future_value: self.future_value,
            predicted_value: self.predicted_value,
            label: self.cluster_name.clone(),
        }
    }
}

/// Converts an ordered snapshot list into chart points.
pub fn to_chart_points(snapshots: &[UtilizationSnapshot]) -> Vec<ChartPoint> {
    snapshots.iter().map(|s| s.to_chart_point()).collect()
}

/// Scaling cooldown state shown next to the charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleStatus {
    pub is_scaling: bool,
    pub last_scale: DateTime<Utc>,
    /// Seconds until the cooldown expires.
    pub timeout: i64,
}

/// Push-channel envelope. Serializes as `{"type": "...", "data": ...}` with
/// camelCase type tags, the format the UI switches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Broadcast {
    Snapshot(UtilizationSnapshot),
    Snapshots(Vec<UtilizationSnapshot>),
    Prediction(UtilizationSnapshot),
    ScaleOutStatus(ScaleStatus),
    ScaleInStatus(ScaleStatus),
}
