// SQLite snapshot history. One flat row per snapshot; timestamps stored as
// epoch milliseconds.

use crate::models::UtilizationSnapshot;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

/// Pull queries return history reaching this far back before the requested
/// start, matching the dashboard's rolling chart window.
const LOOKBACK_HOURS: i64 = 24;

pub struct HistoryRepo {
    pool: SqlitePool,
    retention_ms: i64,
}

impl HistoryRepo {
    pub async fn connect(path: &str, max_pool_size: u32, retention_days: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self { pool, retention_ms })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS utilization_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                cluster_name TEXT NOT NULL,
                num_readers INTEGER NOT NULL,
                max_cpu_utilization REAL NOT NULL,
                predicted_value INTEGER NOT NULL,
                future_value INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_created_at_future ON utilization_history(created_at, future_value)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, snapshots), fields(repo = "history", operation = "save_snapshots", snapshots_count = snapshots.len()))]
    pub async fn save_snapshots(&self, snapshots: &[UtilizationSnapshot]) -> anyhow::Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in snapshots {
            sqlx::query(
                "INSERT INTO utilization_history (created_at, cluster_name, num_readers, max_cpu_utilization, predicted_value, future_value) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(s.timestamp.timestamp_millis())
            .bind(&s.cluster_name)
            .bind(s.num_readers as i64)
            .bind(s.max_cpu_utilization)
            .bind(s.predicted_value)
            .bind(s.future_value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Observed snapshots from the 24 h before `start` onward, ascending.
    /// Forecast rows are excluded; they come from get_prediction_snapshots.
    #[instrument(skip(self), fields(repo = "history", operation = "get_snapshots_since"))]
    pub async fn get_snapshots_since(
        &self,
        start: DateTime<Utc>,
    ) -> anyhow::Result<Vec<UtilizationSnapshot>> {
        let cutoff = (start - Duration::hours(LOOKBACK_HOURS)).timestamp_millis();
        let rows = sqlx::query(
            "SELECT created_at, cluster_name, num_readers, max_cpu_utilization, predicted_value, future_value
             FROM utilization_history WHERE created_at >= $1 AND future_value = 0
             ORDER BY created_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_snapshot_row(&row)?);
        }
        Ok(out)
    }

    /// Forecast snapshots within the plan-ahead horizon from now, ascending.
    #[instrument(skip(self), fields(repo = "history", operation = "get_prediction_snapshots"))]
    pub async fn get_prediction_snapshots(
        &self,
        plan_ahead: Duration,
    ) -> anyhow::Result<Vec<UtilizationSnapshot>> {
        let now = Utc::now();
        let horizon = (now + plan_ahead).timestamp_millis();
        let rows = sqlx::query(
            "SELECT created_at, cluster_name, num_readers, max_cpu_utilization, predicted_value, future_value
             FROM utilization_history WHERE created_at >= $1 AND created_at <= $2 AND future_value = 1
             ORDER BY created_at ASC",
        )
        .bind(now.timestamp_millis())
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_snapshot_row(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(repo = "history", operation = "prune_old_data"))]
    pub async fn prune_old_data(&self) -> anyhow::Result<u64> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        let r = sqlx::query("DELETE FROM utilization_history WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Reclaim space after deletes (run on the VACUUM schedule).
    #[instrument(skip(self), fields(repo = "history", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_snapshot_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<UtilizationSnapshot> {
        let created_at: i64 = row.try_get("created_at")?;
        let cluster_name: String = row.try_get("cluster_name")?;
        let num_readers: i64 = row.try_get("num_readers")?;
        let max_cpu_utilization: f64 = row.try_get("max_cpu_utilization")?;
        let predicted_value: bool = row.try_get("predicted_value")?;
        let future_value: bool = row.try_get("future_value")?;

        let timestamp = DateTime::<Utc>::from_timestamp_millis(created_at)
            .ok_or_else(|| anyhow::anyhow!("created_at {} out of range", created_at))?;

        Ok(UtilizationSnapshot {
            timestamp,
            num_readers: num_readers as u32,
            max_cpu_utilization,
            predicted_value,
            future_value,
            cluster_name,
        })
    }
}
