pub mod normalize;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// The kind of entity a query aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Machine,
    Operator,
    Item,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Machine => "machine",
            EntityType::Operator => "operator",
            EntityType::Item => "item",
        }
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "machine" | "machines" => Ok(EntityType::Machine),
            "operator" | "operators" => Ok(EntityType::Operator),
            "item" | "items" => Ok(EntityType::Item),
            other => Err(Error::Validation(format!("unknown entity type: {other}"))),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The span a rollup row actually accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoveredWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One precomputed row per entity per complete day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupRecord {
    pub entity_type: EntityType,
    pub entity_key: String,
    pub entity_name: Option<String>,
    pub date_key: String,
    pub runtime_ms: i64,
    pub paused_time_ms: i64,
    pub fault_time_ms: i64,
    pub worked_time_ms: i64,
    pub time_credit_ms: i64,
    pub valid_count: u64,
    pub misfeed_count: u64,
    pub covered_window: Option<CoveredWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorRef {
    pub id: String,
    pub name: Option<String>,
    pub station: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionItem {
    pub id: String,
    pub name: Option<String>,
    /// Standard rate as stored; values below 60 are pieces per minute.
    pub standard: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountEvent {
    pub timestamp: DateTime<Utc>,
    pub item_id: Option<String>,
    pub operator_id: Option<String>,
    pub misfeed: bool,
}

/// A contiguous run of activity for one entity. `end == None` means the
/// session is still open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub entity_type: EntityType,
    pub entity_key: String,
    pub entity_name: Option<String>,
    /// Machine the session ran on (equal to `entity_key` for machine sessions).
    pub machine_key: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub operators: Vec<OperatorRef>,
    pub items: Vec<SessionItem>,
    /// Sorted by timestamp.
    pub counts: Vec<CountEvent>,
}

impl SessionRecord {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Raw standard for `item_id` as carried on the session, if any.
    pub fn item_standard(&self, item_id: &str) -> Option<f64> {
        self.items
            .iter()
            .find(|i| i.id == item_id)
            .and_then(|i| i.standard)
    }
}

/// Latest state for one machine from the always-fresh status feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerRecord {
    pub entity_key: String,
    pub entity_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<i64>,
    pub status_name: Option<String>,
    pub operators: Vec<OperatorRef>,
}

/// Reference standard for an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemStandard {
    pub item_id: String,
    pub name: Option<String>,
    pub standard: f64,
}
