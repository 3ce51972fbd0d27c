use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub charting: ChartingConfig,
    pub publishing: PublishingConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Buffered snapshots are flushed to SQLite once this many accumulate.
    pub flush_rate: u64,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * * *"). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_retention_days() -> u32 {
    3
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

/// Parameters for the adaptive time-bucketing aggregator behind
/// /api/snapshots/aggregated.
#[derive(Debug, Clone, Deserialize)]
pub struct ChartingConfig {
    /// Bucket width for older history and all forecast points.
    pub coarse_interval_ms: i64,
    /// Bucket width for observed points within the recency window.
    pub fine_interval_ms: i64,
    /// Lookback from the most recent observed point during which fine
    /// resolution applies.
    pub recency_window_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max number of broadcast messages kept in the channel for /ws (slow clients may lag).
    pub broadcast_capacity: usize,
    /// How far ahead prediction snapshots are returned on pull queries.
    pub plan_ahead_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log app stats (ws clients, snapshots saved) at INFO level.
    pub stats_log_interval_secs: u64,
    /// How often to prune snapshots past retention.
    pub prune_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.flush_rate > 0,
            "database.flush_rate must be > 0, got {}",
            self.database.flush_rate
        );
        anyhow::ensure!(
            self.database.flush_interval_secs > 0,
            "database.flush_interval_secs must be > 0, got {}",
            self.database.flush_interval_secs
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.charting.coarse_interval_ms > 0,
            "charting.coarse_interval_ms must be > 0, got {}",
            self.charting.coarse_interval_ms
        );
        anyhow::ensure!(
            self.charting.fine_interval_ms > 0,
            "charting.fine_interval_ms must be > 0, got {}",
            self.charting.fine_interval_ms
        );
        anyhow::ensure!(
            self.charting.recency_window_ms >= 0,
            "charting.recency_window_ms must be >= 0, got {}",
            self.charting.recency_window_ms
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            self.publishing.plan_ahead_secs > 0,
            "publishing.plan_ahead_secs must be > 0, got {}",
            self.publishing.plan_ahead_secs
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.monitoring.prune_interval_secs > 0,
            "monitoring.prune_interval_secs must be > 0, got {}",
            self.monitoring.prune_interval_secs
        );
        Ok(())
    }
}
