use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::records::normalize::{normalize_session, normalize_ticker};
use crate::records::{EntityType, RollupRecord, SessionRecord, TickerRecord};
use crate::storage::repository;
use crate::storage::store::{ItemStandardsLookup, RollupStore, SessionStore, TickerStore};
use crate::storage::Database;

/// Normalize raw session documents, skipping ones that cannot be read.
fn normalize_sessions(entity_type: EntityType, docs: Vec<String>) -> Vec<SessionRecord> {
    docs.iter()
        .filter_map(|doc| match normalize_session(entity_type, doc) {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("Skipping unreadable {entity_type} session: {e}");
                None
            }
        })
        .collect()
}

#[async_trait]
impl RollupStore for Database {
    async fn query_rollups(
        &self,
        entity_type: EntityType,
        date_keys: &[String],
        entity_keys: Option<&[String]>,
    ) -> Result<Vec<RollupRecord>> {
        let date_keys = date_keys.to_vec();
        let entity_keys = entity_keys.map(<[String]>::to_vec);
        let rows = self
            .reader()
            .call(move |conn| {
                repository::query_rollups(conn, entity_type, &date_keys, entity_keys.as_deref())
            })
            .await?;
        Ok(rows)
    }

    async fn rollup_entity_keys(
        &self,
        entity_type: EntityType,
        date_keys: &[String],
    ) -> Result<Vec<String>> {
        let date_keys = date_keys.to_vec();
        let keys = self
            .reader()
            .call(move |conn| repository::rollup_entity_keys(conn, entity_type, &date_keys))
            .await?;
        Ok(keys)
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn query_sessions(
        &self,
        entity_type: EntityType,
        entity_keys: Option<&[String]>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>> {
        let entity_keys = entity_keys.map(<[String]>::to_vec);
        let (start_ms, end_ms) = (start.timestamp_millis(), end.timestamp_millis());
        let docs = self
            .reader()
            .call(move |conn| {
                repository::session_docs(conn, entity_type, entity_keys.as_deref(), start_ms, end_ms)
            })
            .await?;
        Ok(normalize_sessions(entity_type, docs))
    }

    async fn session_entity_keys(
        &self,
        entity_type: EntityType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let (start_ms, end_ms) = (start.timestamp_millis(), end.timestamp_millis());
        let keys = self
            .reader()
            .call(move |conn| repository::session_entity_keys(conn, entity_type, start_ms, end_ms))
            .await?;
        Ok(keys)
    }

    async fn recent_sessions(
        &self,
        entity_type: EntityType,
        entity_key: &str,
        limit: usize,
    ) -> Result<Vec<SessionRecord>> {
        let entity_key = entity_key.to_string();
        let docs = self
            .reader()
            .call(move |conn| repository::recent_session_docs(conn, entity_type, &entity_key, limit))
            .await?;
        Ok(normalize_sessions(entity_type, docs))
    }
}

#[async_trait]
impl TickerStore for Database {
    async fn latest_per_entity(&self, entity_keys: Option<&[String]>) -> Result<Vec<TickerRecord>> {
        let entity_keys = entity_keys.map(<[String]>::to_vec);
        let docs = self
            .reader()
            .call(move |conn| repository::latest_ticker_docs(conn, entity_keys.as_deref()))
            .await?;
        Ok(docs
            .iter()
            .filter_map(|doc| match normalize_ticker(doc) {
                Ok(t) => Some(t),
                Err(e) => {
                    log::warn!("Skipping unreadable ticker record: {e}");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl ItemStandardsLookup for Database {
    async fn item_standard(&self, item_id: &str) -> Result<Option<f64>> {
        let item_id = item_id.to_string();
        let standard = self
            .reader()
            .call(move |conn| repository::get_item_standard(conn, &item_id))
            .await?;
        Ok(standard)
    }

    async fn all_standards(&self) -> Result<HashMap<String, f64>> {
        let rows = self
            .reader()
            .call(|conn| repository::list_item_standards(conn))
            .await?;
        Ok(rows.into_iter().map(|s| (s.item_id, s.standard)).collect())
    }
}
