//! Maps raw store documents onto the canonical record types.
//!
//! Documents written over the years carry the same facts under different
//! field names: a machine is identified by `machine.serial` or `machine.id`,
//! and an event time lives in `timestamp` or `timestamps.create`. Timestamps
//! are either epoch milliseconds or RFC 3339 strings. Everything in this
//! module runs once, at the store boundary; nothing downstream looks at the
//! raw shapes.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::records::{
    CountEvent, EntityType, OperatorRef, SessionItem, SessionRecord, TickerRecord,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn into_key(self) -> Option<String> {
        match self {
            RawId::Int(i) => Some(i.to_string()),
            RawId::Text(s) => {
                let s = s.trim().to_string();
                (!s.is_empty()).then_some(s)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawRef {
    serial: Option<RawId>,
    id: Option<RawId>,
    name: Option<String>,
    station: Option<i64>,
    standard: Option<f64>,
}

impl RawRef {
    /// `serial` wins over `id` when both are present.
    fn key(&self) -> Option<String> {
        self.serial
            .clone()
            .and_then(RawId::into_key)
            .or_else(|| self.id.clone().and_then(RawId::into_key))
    }

    fn name(&self) -> Option<String> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawTimestamps {
    create: Option<RawTimestamp>,
    start: Option<RawTimestamp>,
    end: Option<RawTimestamp>,
}

#[derive(Debug, Deserialize)]
struct RawCount {
    timestamp: Option<RawTimestamp>,
    timestamps: Option<RawTimestamps>,
    item: Option<RawRef>,
    operator: Option<RawRef>,
    #[serde(default)]
    misfeed: bool,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    machine: Option<RawRef>,
    operator: Option<RawRef>,
    item: Option<RawRef>,
    start: Option<RawTimestamp>,
    end: Option<RawTimestamp>,
    timestamps: Option<RawTimestamps>,
    #[serde(default)]
    operators: Vec<RawRef>,
    #[serde(default)]
    items: Vec<RawRef>,
    #[serde(default)]
    counts: Vec<RawCount>,
    #[serde(default)]
    misfeeds: Vec<RawCount>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStatus {
    code: Option<i64>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    machine: Option<RawRef>,
    timestamp: Option<RawTimestamp>,
    timestamps: Option<RawTimestamps>,
    status: Option<RawStatus>,
    #[serde(default)]
    operators: Vec<RawRef>,
}

fn parse_raw_timestamp(raw: &RawTimestamp) -> Result<DateTime<Utc>> {
    match raw {
        RawTimestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms)
            .ok_or_else(|| Error::Normalize(format!("timestamp out of range: {ms}"))),
        RawTimestamp::Text(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| Error::Normalize(format!("unparsable timestamp '{s}': {e}"))),
    }
}

/// `timestamp` wins over `timestamps.create`.
fn event_time(
    timestamp: Option<&RawTimestamp>,
    timestamps: Option<&RawTimestamps>,
) -> Option<&RawTimestamp> {
    timestamp.or_else(|| timestamps.and_then(|t| t.create.as_ref()))
}

fn operator_ref(raw: &RawRef) -> Option<OperatorRef> {
    Some(OperatorRef {
        id: raw.key()?,
        name: raw.name(),
        station: raw.station,
    })
}

/// Normalize a raw session document for an entity of `entity_type`.
///
/// Counts without a usable time are dropped with a warning; they cannot be
/// placed inside any window.
pub fn normalize_session(entity_type: EntityType, doc: &str) -> Result<SessionRecord> {
    let raw: RawSession = serde_json::from_str(doc)?;

    let identity = match entity_type {
        EntityType::Machine => raw.machine.as_ref(),
        EntityType::Operator => raw.operator.as_ref(),
        EntityType::Item => raw.item.as_ref(),
    };
    let entity_key = identity
        .and_then(RawRef::key)
        .ok_or_else(|| Error::Normalize(format!("{entity_type} session without an identifier")))?;
    let entity_name = identity.and_then(RawRef::name);
    let machine_key = raw.machine.as_ref().and_then(RawRef::key);

    let start_raw = raw
        .timestamps
        .as_ref()
        .and_then(|t| t.start.as_ref())
        .or(raw.start.as_ref())
        .ok_or_else(|| Error::Normalize(format!("session {entity_key} has no start time")))?;
    let start = parse_raw_timestamp(start_raw)?;
    let end = match raw
        .timestamps
        .as_ref()
        .and_then(|t| t.end.as_ref())
        .or(raw.end.as_ref())
    {
        Some(e) => Some(parse_raw_timestamp(e)?),
        None => None,
    };

    let operators = raw.operators.iter().filter_map(operator_ref).collect();
    let items = raw
        .items
        .iter()
        .filter_map(|i| {
            Some(SessionItem {
                id: i.key()?,
                name: i.name(),
                standard: i.standard,
            })
        })
        .collect();

    let mut counts = Vec::with_capacity(raw.counts.len() + raw.misfeeds.len());
    let tagged = raw
        .counts
        .iter()
        .map(|c| (c, c.misfeed))
        .chain(raw.misfeeds.iter().map(|c| (c, true)));
    for (c, misfeed) in tagged {
        let Some(ts) = event_time(c.timestamp.as_ref(), c.timestamps.as_ref()) else {
            log::warn!("Dropping count without a timestamp on session {entity_key}");
            continue;
        };
        let timestamp = match parse_raw_timestamp(ts) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Dropping count on session {entity_key}: {e}");
                continue;
            }
        };
        counts.push(CountEvent {
            timestamp,
            item_id: c.item.as_ref().and_then(RawRef::key),
            operator_id: c.operator.as_ref().and_then(RawRef::key),
            misfeed,
        });
    }
    counts.sort_by_key(|c| c.timestamp);

    Ok(SessionRecord {
        entity_type,
        entity_key,
        entity_name,
        machine_key,
        start,
        end,
        operators,
        items,
        counts,
    })
}

/// Normalize a raw status-feed document.
pub fn normalize_ticker(doc: &str) -> Result<TickerRecord> {
    let raw: RawTicker = serde_json::from_str(doc)?;
    let machine = raw
        .machine
        .as_ref()
        .ok_or_else(|| Error::Normalize("ticker record without a machine".into()))?;
    let entity_key = machine
        .key()
        .ok_or_else(|| Error::Normalize("ticker record without a machine identifier".into()))?;
    let ts = event_time(raw.timestamp.as_ref(), raw.timestamps.as_ref())
        .ok_or_else(|| Error::Normalize(format!("ticker record for {entity_key} has no timestamp")))?;
    let status = raw.status.unwrap_or_default();

    Ok(TickerRecord {
        entity_name: machine.name(),
        timestamp: parse_raw_timestamp(ts)?,
        status_code: status.code,
        status_name: status.name.filter(|n| !n.trim().is_empty()),
        operators: raw.operators.iter().filter_map(operator_ref).collect(),
        entity_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_machine_serial_and_rfc3339() {
        let doc = r#"{
            "machine": {"serial": 67808, "name": "SPF1"},
            "timestamps": {"start": "2025-03-10T08:00:00Z", "end": "2025-03-10T12:00:00Z"},
            "operators": [{"id": 117811, "name": "Ana", "station": 1}, {"id": -1, "station": 2}],
            "items": [{"id": 12, "name": "Towel", "standard": 10}],
            "counts": [
                {"timestamp": "2025-03-10T09:30:00Z", "item": {"id": 12}, "operator": {"id": 117811}},
                {"timestamps": {"create": 1741597200000}, "item": {"id": 12}, "misfeed": true}
            ]
        }"#;
        let s = normalize_session(EntityType::Machine, doc).unwrap();
        assert_eq!(s.entity_key, "67808");
        assert_eq!(s.entity_name.as_deref(), Some("SPF1"));
        assert_eq!(s.machine_key.as_deref(), Some("67808"));
        assert!(!s.is_open());
        assert_eq!(s.operators.len(), 2);
        assert_eq!(s.operators[1].id, "-1");
        assert_eq!(s.item_standard("12"), Some(10.0));
        // Sorted by time: the 09:00 misfeed comes before the 09:30 count
        assert_eq!(s.counts.len(), 2);
        assert!(s.counts[0].misfeed);
        assert_eq!(s.counts[1].operator_id.as_deref(), Some("117811"));
    }

    #[test]
    fn test_session_machine_id_fallback_and_open() {
        let doc = r#"{
            "machine": {"id": "M-7"},
            "start": 1741593600000,
            "misfeeds": [{"timestamp": 1741594000000, "item": {"id": 3}}]
        }"#;
        let s = normalize_session(EntityType::Machine, doc).unwrap();
        assert_eq!(s.entity_key, "M-7");
        assert!(s.is_open());
        assert_eq!(s.counts.len(), 1);
        assert!(s.counts[0].misfeed);
    }

    #[test]
    fn test_session_operator_identity() {
        let doc = r#"{
            "operator": {"id": 117811, "name": "Ana"},
            "machine": {"serial": 67808},
            "timestamps": {"start": "2025-03-10T08:00:00Z"}
        }"#;
        let s = normalize_session(EntityType::Operator, doc).unwrap();
        assert_eq!(s.entity_key, "117811");
        assert_eq!(s.machine_key.as_deref(), Some("67808"));
    }

    #[test]
    fn test_session_missing_identity_or_start() {
        let no_key = r#"{"machine": {"name": "SPF1"}, "start": 1741593600000}"#;
        assert!(matches!(
            normalize_session(EntityType::Machine, no_key),
            Err(Error::Normalize(_))
        ));

        let no_start = r#"{"machine": {"serial": 1}}"#;
        assert!(normalize_session(EntityType::Machine, no_start).is_err());

        let bad_start = r#"{"machine": {"serial": 1}, "start": "yesterday"}"#;
        assert!(normalize_session(EntityType::Machine, bad_start).is_err());
    }

    #[test]
    fn test_counts_without_time_are_dropped() {
        let doc = r#"{
            "machine": {"serial": 1},
            "start": 1741593600000,
            "counts": [{"item": {"id": 3}}, {"timestamp": "not a time", "item": {"id": 3}}]
        }"#;
        let s = normalize_session(EntityType::Machine, doc).unwrap();
        assert!(s.counts.is_empty());
    }

    #[test]
    fn test_ticker_both_field_generations() {
        let old = r#"{"machine": {"serial": 67808, "name": "SPF1"}, "timestamp": 1741593600000,
                      "status": {"code": 1, "name": "Running"},
                      "operators": [{"id": 117811, "name": "Ana"}]}"#;
        let new = r#"{"machine": {"id": 67808}, "timestamps": {"create": "2025-03-10T08:00:00Z"}}"#;

        let a = normalize_ticker(old).unwrap();
        let b = normalize_ticker(new).unwrap();
        assert_eq!(a.entity_key, b.entity_key);
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.status_code, Some(1));
        assert_eq!(a.operators[0].name.as_deref(), Some("Ana"));
        assert_eq!(b.status_name, None);
    }

    #[test]
    fn test_ticker_without_machine_rejected() {
        assert!(normalize_ticker(r#"{"timestamp": 1741593600000}"#).is_err());
        assert!(normalize_ticker(r#"{"machine": {"serial": 1}}"#).is_err());
    }
}
