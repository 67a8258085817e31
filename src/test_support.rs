//! Fixture builders and SQL seeding helpers shared by the unit tests.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde_json::{json, Map, Value};

use crate::records::{CountEvent, EntityType, OperatorRef, SessionItem, SessionRecord};

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// `base` plus `secs` seconds.
pub fn at(base: &str, secs: i64) -> DateTime<Utc> {
    utc(base) + Duration::seconds(secs)
}

pub struct SessionBuilder {
    record: SessionRecord,
}

/// Start a machine session for `key` from `start` to `end` (open if `None`).
pub fn session(key: &str, start: &str, end: Option<&str>) -> SessionBuilder {
    SessionBuilder {
        record: SessionRecord {
            entity_type: EntityType::Machine,
            entity_key: key.to_string(),
            entity_name: None,
            machine_key: None,
            start: utc(start),
            end: end.map(utc),
            operators: Vec::new(),
            items: Vec::new(),
            counts: Vec::new(),
        },
    }
}

impl SessionBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.record.entity_name = Some(name.to_string());
        self
    }

    pub fn machine(mut self, key: &str) -> Self {
        self.record.machine_key = Some(key.to_string());
        self
    }

    pub fn operator(mut self, id: &str) -> Self {
        let station = self.record.operators.len() as i64 + 1;
        self.record.operators.push(OperatorRef {
            id: id.to_string(),
            name: None,
            station: Some(station),
        });
        self
    }

    pub fn item(mut self, id: &str, standard: Option<f64>) -> Self {
        self.record.items.push(SessionItem {
            id: id.to_string(),
            name: None,
            standard,
        });
        self
    }

    pub fn count_at(mut self, timestamp: DateTime<Utc>, item: &str, misfeed: bool) -> Self {
        self.record.counts.push(CountEvent {
            timestamp,
            item_id: Some(item.to_string()),
            operator_id: None,
            misfeed,
        });
        self
    }

    pub fn build(mut self) -> SessionRecord {
        if self.record.machine_key.is_none() {
            self.record.machine_key = Some(self.record.entity_key.clone());
        }
        self.record.counts.sort_by_key(|c| c.timestamp);
        self.record
    }
}

fn reference(id: &str, name: Option<&str>) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), json!(id));
    if let Some(name) = name {
        obj.insert("name".into(), json!(name));
    }
    Value::Object(obj)
}

/// Render `session` as a raw store document identified as `entity_type`.
/// Misfeeds go into the separate `misfeeds` list, as older writers did.
pub fn session_doc(entity_type: EntityType, session: &SessionRecord) -> String {
    let identity = reference(&session.entity_key, session.entity_name.as_deref());
    let mut doc = Map::new();
    match entity_type {
        EntityType::Machine => {
            doc.insert("machine".into(), identity);
        }
        EntityType::Operator => {
            doc.insert("operator".into(), identity);
        }
        EntityType::Item => {
            doc.insert("item".into(), identity);
        }
    }
    if entity_type != EntityType::Machine {
        if let Some(machine) = &session.machine_key {
            doc.insert("machine".into(), json!({ "serial": machine }));
        }
    }
    doc.insert(
        "timestamps".into(),
        json!({
            "start": session.start.timestamp_millis(),
            "end": session.end.map(|e| e.timestamp_millis()),
        }),
    );
    doc.insert(
        "operators".into(),
        session
            .operators
            .iter()
            .map(|o| json!({ "id": o.id, "name": o.name, "station": o.station }))
            .collect(),
    );
    doc.insert(
        "items".into(),
        session
            .items
            .iter()
            .map(|i| json!({ "id": i.id, "name": i.name, "standard": i.standard }))
            .collect(),
    );
    let count = |c: &CountEvent| {
        let mut obj = Map::new();
        obj.insert("timestamp".into(), json!(c.timestamp.timestamp_millis()));
        if let Some(item) = &c.item_id {
            obj.insert("item".into(), json!({ "id": item }));
        }
        if let Some(op) = &c.operator_id {
            obj.insert("operator".into(), json!({ "id": op }));
        }
        Value::Object(obj)
    };
    doc.insert(
        "counts".into(),
        session.counts.iter().filter(|c| !c.misfeed).map(count).collect(),
    );
    doc.insert(
        "misfeeds".into(),
        session.counts.iter().filter(|c| c.misfeed).map(count).collect(),
    );
    Value::Object(doc).to_string()
}

pub fn seed_session(
    conn: &Connection,
    entity_type: EntityType,
    entity_key: &str,
    start_ms: i64,
    end_ms: Option<i64>,
    doc: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO sessions (entity_type, entity_key, start_ms, end_ms, doc)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entity_type.as_str(), entity_key, start_ms, end_ms, doc],
    )?;
    Ok(())
}

pub fn seed_session_record(
    conn: &Connection,
    entity_type: EntityType,
    session: &SessionRecord,
) -> Result<(), rusqlite::Error> {
    seed_session(
        conn,
        entity_type,
        &session.entity_key,
        session.start.timestamp_millis(),
        session.end.map(|e| e.timestamp_millis()),
        &session_doc(entity_type, session),
    )
}

pub fn seed_ticker(
    conn: &Connection,
    entity_key: &str,
    ts_ms: i64,
    doc: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO ticker (entity_key, ts_ms, doc) VALUES (?1, ?2, ?3)",
        params![entity_key, ts_ms, doc],
    )?;
    Ok(())
}

pub fn seed_standard(conn: &Connection, item_id: &str, standard: f64) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO item_standards (item_id, standard) VALUES (?1, ?2)",
        params![item_id, standard],
    )?;
    Ok(())
}

/// A `daily_rollups` row; every numeric field defaults to zero.
#[derive(Debug, Clone)]
pub struct RollupRow {
    pub entity_type: EntityType,
    pub entity_key: String,
    pub entity_name: Option<String>,
    pub date_key: String,
    pub runtime_ms: i64,
    pub paused_time_ms: i64,
    pub fault_time_ms: i64,
    pub worked_time_ms: i64,
    pub time_credit_ms: i64,
    pub valid_count: i64,
    pub misfeed_count: i64,
    pub window: Option<(i64, i64)>,
}

impl RollupRow {
    pub fn new(entity_type: EntityType, entity_key: &str, date_key: &str) -> Self {
        Self {
            entity_type,
            entity_key: entity_key.to_string(),
            entity_name: None,
            date_key: date_key.to_string(),
            runtime_ms: 0,
            paused_time_ms: 0,
            fault_time_ms: 0,
            worked_time_ms: 0,
            time_credit_ms: 0,
            valid_count: 0,
            misfeed_count: 0,
            window: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.entity_name = Some(name.to_string());
        self
    }

    pub fn runtime(mut self, ms: i64) -> Self {
        self.runtime_ms = ms;
        self
    }

    pub fn paused(mut self, ms: i64) -> Self {
        self.paused_time_ms = ms;
        self
    }

    pub fn worked(mut self, ms: i64) -> Self {
        self.worked_time_ms = ms;
        self
    }

    pub fn credit(mut self, ms: i64) -> Self {
        self.time_credit_ms = ms;
        self
    }

    pub fn counts(mut self, valid: i64, misfeed: i64) -> Self {
        self.valid_count = valid;
        self.misfeed_count = misfeed;
        self
    }

    pub fn covered(mut self, start_ms: i64, end_ms: i64) -> Self {
        self.window = Some((start_ms, end_ms));
        self
    }
}

pub fn seed_rollup(conn: &Connection, row: &RollupRow) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO daily_rollups
            (entity_type, entity_key, entity_name, date_key,
             runtime_ms, paused_time_ms, fault_time_ms, worked_time_ms, time_credit_ms,
             valid_count, misfeed_count, window_start_ms, window_end_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            row.entity_type.as_str(),
            row.entity_key,
            row.entity_name,
            row.date_key,
            row.runtime_ms,
            row.paused_time_ms,
            row.fault_time_ms,
            row.worked_time_ms,
            row.time_credit_ms,
            row.valid_count,
            row.misfeed_count,
            row.window.map(|w| w.0),
            row.window.map(|w| w.1),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::normalize::normalize_session;

    #[test]
    fn test_session_doc_normalizes_back() {
        let s = session("117811", "2025-03-10T08:00:00Z", None)
            .name("Ana")
            .machine("67808")
            .operator("117811")
            .item("x", Some(10.0))
            .count_at(at("2025-03-10T08:01:00Z", 0), "x", true)
            .count_at(at("2025-03-10T08:00:30Z", 0), "x", false)
            .build();
        let mut back = normalize_session(EntityType::Operator, &session_doc(EntityType::Operator, &s)).unwrap();
        back.entity_type = EntityType::Machine;
        assert_eq!(back, s);
    }
}
