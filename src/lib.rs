pub mod config;
pub mod date_util;
pub mod error;
pub mod metrics;
pub mod query;
pub mod records;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use metrics::{
    CurrentStatus, EntityMetrics, EntityOutcome, MetricsReport, MetricsRequest, PerformanceMetrics,
};
pub use query::partition::{BucketSource, Partition};
pub use query::window::{TimeWindow, WindowSpec};
pub use records::EntityType;
pub use storage::{Database, Stores};

use storage::repository;

/// Main entry point for the OEE warehouse.
pub struct OeeDW {
    db: Database,
}

impl OeeDW {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Engine settings from `app_config`, with defaults for missing keys.
    pub async fn engine_config(&self) -> Result<EngineConfig> {
        let pairs = self.config_list().await?;
        EngineConfig::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Resolve a window string against the configured zone.
    pub async fn resolve_window(&self, spec: &str, now: DateTime<Utc>) -> Result<TimeWindow> {
        let config = self.engine_config().await?;
        WindowSpec::parse(spec, config.zone())?.resolve(now, config.zone())
    }

    // ── Metrics ────────────────────────────────────────────────────

    pub async fn compute_metrics(&self, request: &MetricsRequest) -> Result<MetricsReport> {
        let config = self.engine_config().await?;
        self.compute_metrics_with(request, &config, Utc::now()).await
    }

    /// Like [`compute_metrics`](Self::compute_metrics) with explicit settings and clock.
    pub async fn compute_metrics_with(
        &self,
        request: &MetricsRequest,
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<MetricsReport> {
        metrics::compute_metrics(&Stores::uniform(&self.db), config, request, now).await
    }

    /// Current state for entities of one type, keyed by entity.
    pub async fn current_status(
        &self,
        entity_type: EntityType,
        entity_keys: Option<&[String]>,
    ) -> Result<BTreeMap<String, CurrentStatus>> {
        let config = self.engine_config().await?;
        let stores = Stores::uniform(&self.db);
        let standards = stores.standards.all_standards().await?;
        metrics::status::resolve_all(
            &stores,
            entity_type,
            entity_keys,
            &standards,
            &config,
            Utc::now(),
        )
        .await
    }

    /// Row counts for the data tables.
    pub async fn stats(&self) -> Result<Vec<(String, i64)>> {
        let counts = self
            .db
            .reader()
            .call(|conn| repository::table_counts(conn))
            .await?;
        Ok(counts)
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .db
            .reader()
            .call(move |conn| repository::get_config(conn, &key))
            .await?;
        Ok(value)
    }

    /// Store a setting after checking that the engine accepts it.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let mut config = self.engine_config().await?;
        config.set(key, value)?;
        let (key, value) = (key.to_string(), value.trim().to_string());
        self.db
            .writer()
            .call(move |conn| repository::set_config(conn, &key, &value))
            .await?;
        Ok(())
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        let pairs = self
            .db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?;
        Ok(pairs)
    }
}
