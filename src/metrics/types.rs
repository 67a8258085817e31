use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::query::partition::Partition;
use crate::query::window::TimeWindow;
use crate::records::{EntityType, OperatorRef};

/// Source-agnostic totals for one entity over some span. Rollup rows and
/// reconstructed sessions both reduce to this shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    pub runtime_ms: i64,
    pub downtime_ms: i64,
    /// Explicit covered span. `None` when no bucket tracked one.
    pub window_ms: Option<i64>,
    pub worked_time_ms: i64,
    pub time_credit_ms: i64,
    pub valid_count: u64,
    pub misfeed_count: u64,
}

impl Aggregate {
    /// An all-zero aggregate that still accounts for `window_ms` of wall time.
    pub fn idle(window_ms: i64) -> Self {
        Self {
            downtime_ms: window_ms.max(0),
            window_ms: Some(window_ms.max(0)),
            ..Self::default()
        }
    }

    /// The tracked window, or runtime plus downtime when none was tracked.
    pub fn effective_window_ms(&self) -> i64 {
        self.window_ms.unwrap_or(self.runtime_ms + self.downtime_ms)
    }

    pub fn total_count(&self) -> u64 {
        self.valid_count + self.misfeed_count
    }
}

/// A derived ratio as a raw value plus a two-decimal percentage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Ratio {
    pub value: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub availability: Ratio,
    pub throughput: Ratio,
    pub efficiency: Ratio,
    pub oee: Ratio,
}

/// How an entity's numbers were assembled.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub cache_buckets: usize,
    pub live_buckets: usize,
    /// Date key of every bucket folded in, in bucket order.
    pub bucket_days: Vec<String>,
    /// Cache buckets with no rollup row for this entity.
    pub missing_rollup_days: Vec<String>,
    /// Sessions that still had runtime or counts after clipping.
    pub contributing_sessions: usize,
    /// The window actually partitioned, after bookending.
    pub effective_window: Option<TimeWindow>,
}

/// A session summarised for "right now" display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSession {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub open: bool,
    pub machine_key: Option<String>,
    pub runtime_ms: i64,
    pub valid_count: u64,
    pub misfeed_count: u64,
    pub efficiency: Ratio,
}

/// Present-moment state for one entity. Never merged into historical numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentStatus {
    pub entity_key: String,
    pub as_of: DateTime<Utc>,
    pub status_code: Option<i64>,
    pub status_name: String,
    pub operators: Vec<OperatorRef>,
    pub session: Option<LiveSession>,
}

/// Final numbers for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMetrics {
    pub entity_key: String,
    pub entity_name: String,
    pub aggregate: Aggregate,
    pub performance: PerformanceMetrics,
    pub current_status: Option<CurrentStatus>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntityOutcome {
    Computed(EntityMetrics),
    Failed { entity_key: String, error: String },
}

impl EntityOutcome {
    pub fn entity_key(&self) -> &str {
        match self {
            EntityOutcome::Computed(m) => &m.entity_key,
            EntityOutcome::Failed { entity_key, .. } => entity_key,
        }
    }

    pub fn metrics(&self) -> Option<&EntityMetrics> {
        match self {
            EntityOutcome::Computed(m) => Some(m),
            EntityOutcome::Failed { .. } => None,
        }
    }
}

/// Result of one `compute_metrics` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub entity_type: EntityType,
    pub window: TimeWindow,
    pub generated_at: DateTime<Utc>,
    /// Shared bucket plan. Absent when bookending gave each entity its own.
    pub partition: Option<Partition>,
    pub entities: BTreeMap<String, EntityOutcome>,
}

impl MetricsReport {
    pub fn computed(&self) -> impl Iterator<Item = &EntityMetrics> {
        self.entities.values().filter_map(EntityOutcome::metrics)
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.entities
            .values()
            .filter(|o| matches!(o, EntityOutcome::Failed { .. }))
    }
}
