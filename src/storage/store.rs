//! Read-side seams the engine queries through. The SQLite-backed
//! [`Database`](crate::storage::Database) implements all of them; tests swap
//! in their own.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::records::{EntityType, RollupRecord, SessionRecord, TickerRecord};

#[async_trait]
pub trait RollupStore: Send + Sync {
    /// Rollup rows for the given days. `entity_keys = None` means every entity.
    async fn query_rollups(
        &self,
        entity_type: EntityType,
        date_keys: &[String],
        entity_keys: Option<&[String]>,
    ) -> Result<Vec<RollupRecord>>;

    /// Entities with at least one rollup row on the given days.
    async fn rollup_entity_keys(
        &self,
        entity_type: EntityType,
        date_keys: &[String],
    ) -> Result<Vec<String>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Sessions overlapping `[start, end)`, already normalized and sorted by start.
    async fn query_sessions(
        &self,
        entity_type: EntityType,
        entity_keys: Option<&[String]>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>>;

    async fn session_entity_keys(
        &self,
        entity_type: EntityType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>>;

    /// Up to `limit` sessions for one entity, newest start first.
    async fn recent_sessions(
        &self,
        entity_type: EntityType,
        entity_key: &str,
        limit: usize,
    ) -> Result<Vec<SessionRecord>>;
}

#[async_trait]
pub trait TickerStore: Send + Sync {
    /// Newest ticker record per machine.
    async fn latest_per_entity(&self, entity_keys: Option<&[String]>) -> Result<Vec<TickerRecord>>;
}

#[async_trait]
pub trait ItemStandardsLookup: Send + Sync {
    async fn item_standard(&self, item_id: &str) -> Result<Option<f64>>;

    /// Every known standard, keyed by item id.
    async fn all_standards(&self) -> Result<HashMap<String, f64>>;
}

/// The set of stores one query runs against.
#[derive(Clone, Copy)]
pub struct Stores<'a> {
    pub rollups: &'a dyn RollupStore,
    pub sessions: &'a dyn SessionStore,
    pub ticker: &'a dyn TickerStore,
    pub standards: &'a dyn ItemStandardsLookup,
}

impl<'a> Stores<'a> {
    /// Use one backend for every store.
    pub fn uniform<S>(backend: &'a S) -> Self
    where
        S: RollupStore + SessionStore + TickerStore + ItemStandardsLookup,
    {
        Self {
            rollups: backend,
            sessions: backend,
            ticker: backend,
            standards: backend,
        }
    }
}
