pub mod formula;
pub mod merge;
pub mod reconstruct;
pub mod rollup;
pub mod status;
pub mod types;

pub use types::*;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::metrics::merge::{BucketContribution, EntityAccumulator};
use crate::query::partition::{partition, BucketSource, DayBucket, Partition};
use crate::query::window::TimeWindow;
use crate::records::EntityType;
use crate::storage::Stores;

/// What to compute: one entity type, an optional set of keys and a window.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRequest {
    pub entity_type: EntityType,
    /// `None` means every entity with data in the window.
    pub entities: Option<Vec<String>>,
    pub window: TimeWindow,
    /// Narrow each entity's window to its first and last session first.
    pub bookend: bool,
    pub include_status: bool,
}

impl MetricsRequest {
    pub fn new(entity_type: EntityType, window: TimeWindow) -> Self {
        Self {
            entity_type,
            entities: None,
            window,
            bookend: false,
            include_status: false,
        }
    }

    pub fn entities<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn bookend(mut self, bookend: bool) -> Self {
        self.bookend = bookend;
        self
    }

    pub fn with_status(mut self, include_status: bool) -> Self {
        self.include_status = include_status;
        self
    }
}

/// Produce one bucket's numbers for one entity from whichever path the
/// bucket was planned for.
async fn fetch_contribution(
    stores: &Stores<'_>,
    entity_type: EntityType,
    entity_key: &str,
    bucket: &DayBucket,
    standards: &HashMap<String, f64>,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<BucketContribution> {
    match bucket.source {
        BucketSource::Cache => {
            rollup::fetch_bucket(stores.rollups, entity_type, entity_key, bucket, now).await
        }
        BucketSource::Live => {
            let keys = [entity_key.to_string()];
            let mut sessions = stores
                .sessions
                .query_sessions(entity_type, Some(&keys[..]), bucket.start, bucket.end)
                .await?;
            sessions.retain(|s| s.entity_key == entity_key);
            Ok(reconstruct::reconstruct_bucket(
                bucket,
                &sessions,
                standards,
                &config.no_operator_id,
            ))
        }
    }
}

/// The window this entity is partitioned over, and its plan when it differs
/// from the shared one.
async fn entity_plan(
    stores: &Stores<'_>,
    request: &MetricsRequest,
    entity_key: &str,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<(TimeWindow, Option<Partition>)> {
    if !request.bookend {
        return Ok((request.window, None));
    }
    let keys = [entity_key.to_string()];
    let sessions = stores
        .sessions
        .query_sessions(
            request.entity_type,
            Some(&keys[..]),
            request.window.start,
            request.window.end,
        )
        .await?;
    match reconstruct::bookend_window(&sessions, &request.window) {
        Some(narrowed) if narrowed != request.window => {
            log::debug!(
                "Bookended {} {} to {}..{}",
                request.entity_type,
                entity_key,
                narrowed.start.to_rfc3339(),
                narrowed.end.to_rfc3339()
            );
            Ok((narrowed, Some(partition(&narrowed, now, config))))
        }
        _ => Ok((request.window, None)),
    }
}

/// Fold every bucket for one entity. Any failed fetch fails the entity.
async fn compute_entity(
    stores: &Stores<'_>,
    config: &EngineConfig,
    request: &MetricsRequest,
    shared: &Partition,
    entity_key: &str,
    standards: &HashMap<String, f64>,
    now: DateTime<Utc>,
) -> Result<EntityAccumulator> {
    let (effective, own) = entity_plan(stores, request, entity_key, config, now).await?;
    let plan = own.as_ref().unwrap_or(shared);

    let fetches = plan.buckets.iter().map(|bucket| {
        fetch_contribution(
            stores,
            request.entity_type,
            entity_key,
            bucket,
            standards,
            config,
            now,
        )
    });
    // join_all yields results in bucket order regardless of completion order
    let contributions = join_all(fetches).await;

    let mut acc = EntityAccumulator::new(entity_key);
    for contribution in contributions {
        acc.add(contribution?);
    }
    acc.diagnostics.effective_window = Some(effective);
    Ok(acc)
}

/// Entities to compute: the requested keys, or every entity with rollups on
/// any bucket day or sessions overlapping the window.
async fn resolve_entities(
    stores: &Stores<'_>,
    request: &MetricsRequest,
    shared: &Partition,
) -> Result<(Vec<String>, bool)> {
    if let Some(keys) = &request.entities {
        let unique: BTreeSet<String> = keys
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        return Ok((unique.into_iter().collect(), true));
    }

    let date_keys: Vec<String> = shared
        .buckets
        .iter()
        .map(|b| b.date_key.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let (from_rollups, from_sessions) = futures::join!(
        stores.rollups.rollup_entity_keys(request.entity_type, &date_keys),
        stores
            .sessions
            .session_entity_keys(request.entity_type, request.window.start, request.window.end),
    );
    let mut keys: BTreeSet<String> = from_rollups?.into_iter().collect();
    keys.extend(from_sessions?);
    Ok((keys.into_iter().collect(), false))
}

/// Compute availability, throughput, efficiency and OEE for every entity of
/// one type over `request.window`.
///
/// Complete days come from rollups and partial days from clipped sessions.
/// Entities are computed concurrently and independently: a store failure for
/// one entity is reported as [`EntityOutcome::Failed`] while the others
/// still return. Without an explicit entity list, entities with no data in
/// the window are left out.
pub async fn compute_metrics(
    stores: &Stores<'_>,
    config: &EngineConfig,
    request: &MetricsRequest,
    now: DateTime<Utc>,
) -> Result<MetricsReport> {
    let shared = partition(&request.window, now, config);
    let (entity_keys, explicit) = resolve_entities(stores, request, &shared).await?;

    let standards = match stores.standards.all_standards().await {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Item standards unavailable, falling back to per-session standards: {e}");
            HashMap::new()
        }
    };

    let work = entity_keys.iter().map(|key| {
        let standards = &standards;
        let shared = &shared;
        async move {
            let metrics = compute_entity(stores, config, request, shared, key, standards, now);
            let status = async {
                if !request.include_status {
                    return None;
                }
                match status::resolve_status(stores, request.entity_type, key, standards, config, now)
                    .await
                {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!("Status lookup failed for {} {key}: {e}", request.entity_type);
                        None
                    }
                }
            };
            let (metrics, status) = futures::join!(metrics, status);
            (key, metrics, status)
        }
    });

    let mut entities = BTreeMap::new();
    for (key, result, current_status) in join_all(work).await {
        match result {
            Ok(acc) => {
                if !explicit && !acc.has_data() {
                    continue;
                }
                let entity_name = acc.display_name();
                entities.insert(
                    key.clone(),
                    EntityOutcome::Computed(EntityMetrics {
                        entity_key: acc.entity_key,
                        entity_name,
                        performance: formula::performance(&acc.aggregate, config.efficiency_clamp),
                        aggregate: acc.aggregate,
                        current_status,
                        diagnostics: acc.diagnostics,
                    }),
                );
            }
            Err(e) => {
                let e = e.for_entity(key);
                log::warn!("{e}");
                entities.insert(
                    key.clone(),
                    EntityOutcome::Failed {
                        entity_key: key.clone(),
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    log::info!(
        "Computed {} {} metrics over {}..{} ({} buckets: {} cache, {} live)",
        entities.len(),
        request.entity_type,
        request.window.start.to_rfc3339(),
        request.window.end.to_rfc3339(),
        shared.buckets.len(),
        shared.count(BucketSource::Cache),
        shared.count(BucketSource::Live),
    );

    Ok(MetricsReport {
        entity_type: request.entity_type,
        window: request.window,
        generated_at: now,
        partition: (!request.bookend).then_some(shared),
        entities,
    })
}
