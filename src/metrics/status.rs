//! "Right now" state, attached to historical results but never merged into them.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::metrics::formula;
use crate::metrics::reconstruct::{clip, recalc};
use crate::metrics::types::{Aggregate, CurrentStatus, LiveSession};
use crate::query::window::TimeWindow;
use crate::records::{EntityType, SessionRecord, TickerRecord};
use crate::storage::Stores;

/// How many recent sessions to scan for the current one.
pub const RECENT_SESSIONS: usize = 5;

const STATUS_UNKNOWN: &str = "Unknown";
const STATUS_IDLE: &str = "Idle";

/// Keep the newest record per machine. On a timestamp tie the first one seen wins.
pub fn latest_per_key(records: Vec<TickerRecord>) -> BTreeMap<String, TickerRecord> {
    let mut latest: BTreeMap<String, TickerRecord> = BTreeMap::new();
    for record in records {
        match latest.get(&record.entity_key) {
            Some(existing) if existing.timestamp >= record.timestamp => {}
            _ => {
                latest.insert(record.entity_key.clone(), record);
            }
        }
    }
    latest
}

/// The open session with the latest start, or failing that the closed
/// session that ended last.
pub fn current_session(sessions: &[SessionRecord]) -> Option<&SessionRecord> {
    if let Some(open) = sessions.iter().filter(|s| s.is_open()).max_by_key(|s| s.start) {
        return Some(open);
    }
    sessions.iter().filter(|s| s.end.is_some()).max_by_key(|s| s.end)
}

/// Summarise a session from its start to its end, or to `now` while open.
pub fn live_session(
    session: &SessionRecord,
    standards: &HashMap<String, f64>,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> LiveSession {
    let end = session.end.unwrap_or(now).max(session.start);
    let m = recalc(
        &clip(session, &TimeWindow::raw(session.start, end)),
        standards,
        &config.no_operator_id,
    );
    let agg = Aggregate {
        runtime_ms: m.runtime_ms,
        worked_time_ms: m.worked_time_ms,
        time_credit_ms: m.time_credit_ms,
        valid_count: m.valid_count,
        misfeed_count: m.misfeed_count,
        ..Aggregate::default()
    };
    LiveSession {
        start: session.start,
        end: session.end,
        open: session.is_open(),
        machine_key: session.machine_key.clone(),
        runtime_ms: m.runtime_ms,
        valid_count: m.valid_count,
        misfeed_count: m.misfeed_count,
        efficiency: formula::ratio(formula::efficiency(&agg, config.efficiency_clamp)),
    }
}

async fn machine_ticker(stores: &Stores<'_>, machine_key: &str) -> Result<Option<TickerRecord>> {
    let keys = [machine_key.to_string()];
    let records = stores.ticker.latest_per_entity(Some(&keys[..])).await?;
    Ok(latest_per_key(records).remove(machine_key))
}

/// Resolve the current state of one entity.
///
/// Machines read the status feed. Operators take the state of the machine
/// their open session runs on and report idle otherwise. Items have no
/// present-moment state.
pub async fn resolve_status(
    stores: &Stores<'_>,
    entity_type: EntityType,
    entity_key: &str,
    standards: &HashMap<String, f64>,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<Option<CurrentStatus>> {
    match entity_type {
        EntityType::Item => Ok(None),
        EntityType::Machine => {
            let ticker = machine_ticker(stores, entity_key).await?;
            let sessions = stores
                .sessions
                .recent_sessions(EntityType::Machine, entity_key, RECENT_SESSIONS)
                .await?;
            let session = current_session(&sessions);
            if ticker.is_none() && session.is_none() {
                return Ok(None);
            }
            let operators = match (&ticker, session) {
                (Some(t), _) if !t.operators.is_empty() => t.operators.clone(),
                (_, Some(s)) => s.operators.clone(),
                _ => Vec::new(),
            };
            Ok(Some(CurrentStatus {
                entity_key: entity_key.to_string(),
                as_of: ticker.as_ref().map(|t| t.timestamp).unwrap_or(now),
                status_code: ticker.as_ref().and_then(|t| t.status_code),
                status_name: ticker
                    .as_ref()
                    .and_then(|t| t.status_name.clone())
                    .unwrap_or_else(|| STATUS_UNKNOWN.to_string()),
                operators,
                session: session.map(|s| live_session(s, standards, config, now)),
            }))
        }
        EntityType::Operator => {
            let sessions = stores
                .sessions
                .recent_sessions(EntityType::Operator, entity_key, RECENT_SESSIONS)
                .await?;
            let Some(session) = current_session(&sessions) else {
                return Ok(None);
            };

            let machine = match (&session.machine_key, session.is_open()) {
                (Some(machine_key), true) => machine_ticker(stores, machine_key).await?,
                _ => None,
            };
            let (status_code, status_name) = match (&machine, session.is_open()) {
                (Some(t), _) => (
                    t.status_code,
                    t.status_name.clone().unwrap_or_else(|| STATUS_UNKNOWN.to_string()),
                ),
                (None, true) => (None, STATUS_UNKNOWN.to_string()),
                (None, false) => (None, STATUS_IDLE.to_string()),
            };

            Ok(Some(CurrentStatus {
                entity_key: entity_key.to_string(),
                as_of: now,
                status_code,
                status_name,
                operators: session.operators.clone(),
                session: Some(live_session(session, standards, config, now)),
            }))
        }
    }
}

/// Resolve state for several entities at once. Without a key list, machines
/// are taken from the status feed and operators from sessions active during
/// the last day. Per-entity failures are logged and skipped.
pub async fn resolve_all(
    stores: &Stores<'_>,
    entity_type: EntityType,
    entity_keys: Option<&[String]>,
    standards: &HashMap<String, f64>,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, CurrentStatus>> {
    let keys: Vec<String> = match (entity_keys, entity_type) {
        (Some(keys), _) => keys.to_vec(),
        (None, EntityType::Machine) => latest_per_key(stores.ticker.latest_per_entity(None).await?)
            .into_keys()
            .collect(),
        (None, EntityType::Operator) => {
            stores
                .sessions
                .session_entity_keys(EntityType::Operator, now - Duration::days(1), now)
                .await?
        }
        (None, EntityType::Item) => Vec::new(),
    };

    let lookups = keys.iter().map(|key| async move {
        let result = resolve_status(stores, entity_type, key, standards, config, now).await;
        (key, result)
    });
    let mut out = BTreeMap::new();
    for (key, result) in join_all(lookups).await {
        match result {
            Ok(Some(status)) => {
                out.insert(key.clone(), status);
            }
            Ok(None) => log::debug!("No current state for {entity_type} {key}"),
            Err(e) => log::warn!("{}", e.for_entity(key)),
        }
    }
    Ok(out)
}
