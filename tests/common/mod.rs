// Shared test helpers

use chrono::{DateTime, Utc};
use scaler_dashboard::models::UtilizationSnapshot;

pub fn snapshot_at(ts_ms: i64) -> UtilizationSnapshot {
    UtilizationSnapshot {
        timestamp: DateTime::<Utc>::from_timestamp_millis(ts_ms).unwrap(),
        num_readers: 2,
        max_cpu_utilization: 40.0,
        predicted_value: false,
        future_value: false,
        cluster_name: "test-cluster".to_string(),
    }
}
