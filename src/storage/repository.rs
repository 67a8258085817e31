use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::records::{CoveredWindow, EntityType, ItemStandard, RollupRecord};

fn placeholders(n: usize) -> String {
    (0..n).map(|_| "?").collect::<Vec<_>>().join(",")
}

fn millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Daily rollups ──────────────────────────────────────────────────

fn rollup_from_row(entity_type: EntityType, row: &Row<'_>) -> Result<RollupRecord, rusqlite::Error> {
    let window_start: Option<i64> = row.get(10)?;
    let window_end: Option<i64> = row.get(11)?;
    let covered_window = match (window_start.and_then(millis), window_end.and_then(millis)) {
        (Some(start), Some(end)) if start <= end => Some(CoveredWindow { start, end }),
        _ => None,
    };
    Ok(RollupRecord {
        entity_type,
        entity_key: row.get(0)?,
        entity_name: row.get(1)?,
        date_key: row.get(2)?,
        runtime_ms: row.get(3)?,
        paused_time_ms: row.get(4)?,
        fault_time_ms: row.get(5)?,
        worked_time_ms: row.get(6)?,
        time_credit_ms: row.get(7)?,
        valid_count: row.get::<_, i64>(8)?.max(0) as u64,
        misfeed_count: row.get::<_, i64>(9)?.max(0) as u64,
        covered_window,
    })
}

/// Rollup rows of `entity_type` for the given date keys, optionally limited
/// to some entity keys. An empty filter matches nothing.
pub fn query_rollups(
    conn: &Connection,
    entity_type: EntityType,
    date_keys: &[String],
    entity_keys: Option<&[String]>,
) -> Result<Vec<RollupRecord>, rusqlite::Error> {
    if date_keys.is_empty() || entity_keys.is_some_and(|k| k.is_empty()) {
        return Ok(Vec::new());
    }

    let mut sql = format!(
        "SELECT entity_key, entity_name, date_key,
                runtime_ms, paused_time_ms, fault_time_ms, worked_time_ms, time_credit_ms,
                valid_count, misfeed_count, window_start_ms, window_end_ms
         FROM daily_rollups
         WHERE entity_type = ? AND date_key IN ({})",
        placeholders(date_keys.len())
    );
    if let Some(keys) = entity_keys {
        sql.push_str(&format!(" AND entity_key IN ({})", placeholders(keys.len())));
    }
    sql.push_str(" ORDER BY date_key, entity_key");

    let mut stmt = conn.prepare(&sql)?;
    let mut idx = 1;
    stmt.raw_bind_parameter(idx, entity_type.as_str())?;
    for key in date_keys {
        idx += 1;
        stmt.raw_bind_parameter(idx, key)?;
    }
    for key in entity_keys.unwrap_or_default() {
        idx += 1;
        stmt.raw_bind_parameter(idx, key)?;
    }

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        out.push(rollup_from_row(entity_type, row)?);
    }
    Ok(out)
}

/// Distinct entity keys with a rollup row on any of the given days.
pub fn rollup_entity_keys(
    conn: &Connection,
    entity_type: EntityType,
    date_keys: &[String],
) -> Result<Vec<String>, rusqlite::Error> {
    if date_keys.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT DISTINCT entity_key FROM daily_rollups
         WHERE entity_type = ? AND date_key IN ({})
         ORDER BY entity_key",
        placeholders(date_keys.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, entity_type.as_str())?;
    for (i, key) in date_keys.iter().enumerate() {
        stmt.raw_bind_parameter(i + 2, key)?;
    }
    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        out.push(row.get(0)?);
    }
    Ok(out)
}

// ── Sessions ───────────────────────────────────────────────────────

/// Raw documents of sessions overlapping `[start_ms, end_ms)`, oldest first.
/// Open sessions (no end) overlap everything after their start.
pub fn session_docs(
    conn: &Connection,
    entity_type: EntityType,
    entity_keys: Option<&[String]>,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<String>, rusqlite::Error> {
    if entity_keys.is_some_and(|k| k.is_empty()) {
        return Ok(Vec::new());
    }

    let mut sql = String::from(
        "SELECT doc FROM sessions
         WHERE entity_type = ? AND start_ms < ? AND (end_ms IS NULL OR end_ms > ?)",
    );
    if let Some(keys) = entity_keys {
        sql.push_str(&format!(" AND entity_key IN ({})", placeholders(keys.len())));
    }
    sql.push_str(" ORDER BY start_ms, id");

    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, entity_type.as_str())?;
    stmt.raw_bind_parameter(2, end_ms)?;
    stmt.raw_bind_parameter(3, start_ms)?;
    let mut idx = 3;
    for key in entity_keys.unwrap_or_default() {
        idx += 1;
        stmt.raw_bind_parameter(idx, key)?;
    }

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        out.push(row.get(0)?);
    }
    Ok(out)
}

pub fn session_entity_keys(
    conn: &Connection,
    entity_type: EntityType,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT entity_key FROM sessions
         WHERE entity_type = ?1 AND start_ms < ?2 AND (end_ms IS NULL OR end_ms > ?3)
         ORDER BY entity_key",
    )?;
    let rows = stmt.query_map(params![entity_type.as_str(), end_ms, start_ms], |row| {
        row.get(0)
    })?;
    rows.collect()
}

/// Most recent session documents for one entity, newest first.
pub fn recent_session_docs(
    conn: &Connection,
    entity_type: EntityType,
    entity_key: &str,
    limit: usize,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT doc FROM sessions
         WHERE entity_type = ?1 AND entity_key = ?2
         ORDER BY start_ms DESC, id DESC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(
        params![entity_type.as_str(), entity_key, limit as i64],
        |row| row.get(0),
    )?;
    rows.collect()
}

// ── Ticker ─────────────────────────────────────────────────────────

/// The newest ticker document per machine. Ties on timestamp return every
/// tied row; callers pick one.
pub fn latest_ticker_docs(
    conn: &Connection,
    entity_keys: Option<&[String]>,
) -> Result<Vec<String>, rusqlite::Error> {
    if entity_keys.is_some_and(|k| k.is_empty()) {
        return Ok(Vec::new());
    }

    let mut sql = String::from(
        "SELECT t.doc FROM ticker t
         JOIN (SELECT entity_key, MAX(ts_ms) AS ts_ms FROM ticker GROUP BY entity_key) latest
           ON latest.entity_key = t.entity_key AND latest.ts_ms = t.ts_ms",
    );
    if let Some(keys) = entity_keys {
        sql.push_str(&format!(" WHERE t.entity_key IN ({})", placeholders(keys.len())));
    }
    sql.push_str(" ORDER BY t.entity_key, t.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    for (i, key) in entity_keys.unwrap_or_default().iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, key)?;
    }
    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        out.push(row.get(0)?);
    }
    Ok(out)
}

// ── Item standards ─────────────────────────────────────────────────

pub fn get_item_standard(conn: &Connection, item_id: &str) -> Result<Option<f64>, rusqlite::Error> {
    conn.query_row(
        "SELECT standard FROM item_standards WHERE item_id = ?1",
        params![item_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn list_item_standards(conn: &Connection) -> Result<Vec<ItemStandard>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT item_id, name, standard FROM item_standards ORDER BY item_id")?;
    let rows = stmt.query_map([], |row| {
        Ok(ItemStandard {
            item_id: row.get(0)?,
            name: row.get(1)?,
            standard: row.get(2)?,
        })
    })?;
    rows.collect()
}

// ── Stats ──────────────────────────────────────────────────────────

/// Row counts for the data tables, in a fixed order.
pub fn table_counts(conn: &Connection) -> Result<Vec<(String, i64)>, rusqlite::Error> {
    let mut out = Vec::new();
    for table in ["daily_rollups", "sessions", "ticker", "item_standards"] {
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        out.push((table.to_string(), count));
    }
    Ok(out)
}
