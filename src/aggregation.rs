// Adaptive time-bucketing: downsample an ordered snapshot series for charting.
// Fine buckets within the recency window before "now", coarse buckets for
// older history and for forecasts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregateError {
    /// Invalid interval parameters. Raised before any point is processed.
    #[error("configuration: {0}")]
    Configuration(String),
    /// A point that cannot be aggregated (missing metric, out-of-order
    /// timestamp). The whole call aborts; no partial output is returned.
    #[error("data: {0}")]
    Data(String),
}

/// Names one numeric metric the aggregator tracks (averages per bucket).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricField {
    pub name: &'static str,
}

impl MetricField {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

pub const MAX_CPU_UTILIZATION: MetricField = MetricField::new("max_cpu_utilization");
pub const NUM_READERS: MetricField = MetricField::new("num_readers");
pub const CLUSTER_UTILIZATION: MetricField = MetricField::new("cluster_utilization");

/// Metric set plotted by the dashboard charts.
pub const CHART_METRICS: [MetricField; 3] = [MAX_CPU_UTILIZATION, NUM_READERS, CLUSTER_UTILIZATION];

/// One chartable point: a timestamp, an extensible metric mapping, and the
/// flags the charts color by. `label` is carried but never aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
    pub future_value: bool,
    pub predicted_value: bool,
    pub label: String,
}

/// Downsamples `points` (ascending by timestamp) into averaged buckets.
///
/// Points inside `recency_window_ms` before the anchor (the most recent
/// non-forecast point) bucket at `fine_interval_ms`; everything else,
/// forecasts included, buckets at `coarse_interval_ms`. Each emitted bucket
/// averages the tracked `metrics` over its members and copies timestamp,
/// flags, label, and untracked metrics verbatim from its first member.
///
/// The bucket width is re-evaluated against each incoming point's own
/// classification, not the open bucket's, so a bucket opened under fine
/// resolution can keep absorbing points under coarse rules and end up wider
/// than either configured interval. Downstream chart semantics rely on this.
pub fn aggregate(
    points: &[ChartPoint],
    metrics: &[MetricField],
    coarse_interval_ms: i64,
    fine_interval_ms: i64,
    recency_window_ms: i64,
) -> Result<Vec<ChartPoint>, AggregateError> {
    if coarse_interval_ms <= 0 {
        return Err(AggregateError::Configuration(format!(
            "coarse_interval_ms must be > 0, got {coarse_interval_ms}"
        )));
    }
    if fine_interval_ms <= 0 {
        return Err(AggregateError::Configuration(format!(
            "fine_interval_ms must be > 0, got {fine_interval_ms}"
        )));
    }
    if recency_window_ms < 0 {
        return Err(AggregateError::Configuration(format!(
            "recency_window_ms must be >= 0, got {recency_window_ms}"
        )));
    }

    // Anchor: the most recent observed (non-forecast) point. Without one,
    // recency classification is moot and every point buckets coarse.
    let anchor_ms = points
        .iter()
        .rev()
        .find(|p| !p.future_value)
        .map(|p| p.timestamp.timestamp_millis());

    let mut out: Vec<ChartPoint> = Vec::new();
    let mut state = BucketState::Empty;
    let mut prev_ms: Option<i64> = None;

    for point in points {
        let ts_ms = point.timestamp.timestamp_millis();
        if let Some(prev) = prev_ms
            && ts_ms < prev
        {
            return Err(AggregateError::Data(format!(
                "point at {} is out of order (previous point is later)",
                point.timestamp.to_rfc3339()
            )));
        }
        prev_ms = Some(ts_ms);

        let width_ms = match anchor_ms {
            Some(anchor) if !point.future_value && anchor - ts_ms <= recency_window_ms => {
                fine_interval_ms
            }
            _ => coarse_interval_ms,
        };

        state = match state {
            BucketState::Empty => BucketState::Open(Accumulator::open(point, metrics)?),
            BucketState::Open(mut acc) => {
                if ts_ms - acc.start_ms >= width_ms {
                    out.push(acc.finish(metrics));
                    BucketState::Open(Accumulator::open(point, metrics)?)
                } else {
                    acc.add(point, metrics)?;
                    BucketState::Open(acc)
                }
            }
        };
    }

    // The trailing bucket is always emitted, whatever its member count.
    if let BucketState::Open(acc) = state {
        out.push(acc.finish(metrics));
    }
    Ok(out)
}

/// Traversal state: no bucket yet (start, or right after a flush) or an open
/// accumulator. Explicit so emptiness and termination are unambiguous.
enum BucketState {
    Empty,
    Open(Accumulator),
}

/// One open bucket: the first member (source of timestamp, flags, label, and
/// untracked metrics) plus running sums for the tracked metrics.
struct Accumulator {
    first: ChartPoint,
    start_ms: i64,
    sums: Vec<f64>,
    count: usize,
}

impl Accumulator {
    fn open(point: &ChartPoint, metrics: &[MetricField]) -> Result<Self, AggregateError> {
        let mut sums = Vec::with_capacity(metrics.len());
        for field in metrics {
            sums.push(metric_value(point, field)?);
        }
        Ok(Self {
            first: point.clone(),
            start_ms: point.timestamp.timestamp_millis(),
            sums,
            count: 1,
        })
    }

    fn add(&mut self, point: &ChartPoint, metrics: &[MetricField]) -> Result<(), AggregateError> {
        for (sum, field) in self.sums.iter_mut().zip(metrics) {
            *sum += metric_value(point, field)?;
        }
        self.count += 1;
        Ok(())
    }

    /// Emits the averaged bucket. Unweighted arithmetic mean per tracked
    /// metric; everything else comes from the first member.
    fn finish(self, metrics: &[MetricField]) -> ChartPoint {
        let mut merged = self.first;
        let count = self.count as f64;
        for (sum, field) in self.sums.into_iter().zip(metrics) {
            merged.metrics.insert(field.name.to_string(), sum / count);
        }
        merged
    }
}

fn metric_value(point: &ChartPoint, field: &MetricField) -> Result<f64, AggregateError> {
    point.metrics.get(field.name).copied().ok_or_else(|| {
        AggregateError::Data(format!(
            "metric '{}' missing on point at {}",
            field.name,
            point.timestamp.to_rfc3339()
        ))
    })
}
