//! Live path: rebuild a bucket's numbers from raw sessions.
//!
//! Sessions that straddle a bucket boundary are clipped to it, and runtime,
//! worked time, counts and time credit are recomputed for the clipped span.
//! Stored per-session totals are never trusted for partial windows.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::date_util::span_ms;
use crate::metrics::merge::BucketContribution;
use crate::metrics::types::Aggregate;
use crate::query::partition::{BucketSource, DayBucket};
use crate::query::window::TimeWindow;
use crate::records::{CountEvent, SessionRecord};

/// Standards below this are pieces per minute.
const PER_MINUTE_CUTOFF: f64 = 60.0;

/// A read-only view of a session restricted to a window. The underlying
/// record is never modified, so one fetched session can be clipped to any
/// number of buckets.
#[derive(Debug, Clone, Copy)]
pub struct ClippedSession<'a> {
    pub session: &'a SessionRecord,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ClippedSession<'_> {
    /// Zero when the session does not reach into the window.
    pub fn runtime_ms(&self) -> i64 {
        span_ms(self.start, self.end)
    }

    /// Counts inside `[start, end)`. The end is exclusive so an event on a
    /// bucket boundary lands in exactly one bucket.
    pub fn counts(&self) -> impl Iterator<Item = &CountEvent> + '_ {
        let window = TimeWindow::raw(self.start, self.end);
        self.session
            .counts
            .iter()
            .filter(move |c| window.contains(c.timestamp))
    }
}

/// Restrict `session` to `window`. An open session runs to the window end.
pub fn clip<'a>(session: &'a SessionRecord, window: &TimeWindow) -> ClippedSession<'a> {
    let start = session.start.max(window.start);
    let end = session.end.unwrap_or(window.end).min(window.end);
    ClippedSession {
        session,
        start,
        end: end.max(start),
    }
}

/// Numbers recomputed for one clipped session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionMetrics {
    pub runtime_ms: i64,
    pub worked_time_ms: i64,
    pub time_credit_ms: i64,
    pub valid_count: u64,
    pub misfeed_count: u64,
    pub active_stations: usize,
}

/// Normalize a stored standard to pieces per hour. Non-positive or
/// non-finite standards are unusable.
pub fn normalize_pph(standard: f64) -> Option<f64> {
    if !standard.is_finite() || standard <= 0.0 {
        return None;
    }
    if standard < PER_MINUTE_CUTOFF {
        Some(standard * 60.0)
    } else {
        Some(standard)
    }
}

/// Recompute metrics for a clipped session.
///
/// The session's own item list is consulted for standards first, then the
/// shared `standards` map. Items with no usable standard earn no credit.
pub fn recalc(
    clipped: &ClippedSession<'_>,
    standards: &HashMap<String, f64>,
    no_operator_id: &str,
) -> SessionMetrics {
    let runtime_ms = clipped.runtime_ms();

    let stations: BTreeSet<&str> = clipped
        .session
        .operators
        .iter()
        .map(|o| o.id.as_str())
        .filter(|id| *id != no_operator_id)
        .collect();
    let worked_time_ms = runtime_ms * stations.len().max(1) as i64;

    let mut valid_count = 0u64;
    let mut misfeed_count = 0u64;
    let mut per_item: BTreeMap<Option<&str>, u64> = BTreeMap::new();
    for c in clipped.counts() {
        if c.misfeed {
            misfeed_count += 1;
        } else {
            valid_count += 1;
            *per_item.entry(c.item_id.as_deref()).or_default() += 1;
        }
    }

    let mut credit_s = 0.0;
    for (item_id, count) in per_item {
        let Some(item_id) = item_id else {
            log::debug!(
                "{} valid counts without an item on session {}",
                count,
                clipped.session.entity_key
            );
            continue;
        };
        let pph = clipped
            .session
            .item_standard(item_id)
            .and_then(normalize_pph)
            .or_else(|| standards.get(item_id).copied().and_then(normalize_pph));
        match pph {
            Some(pph) => credit_s += count as f64 / (pph / 3600.0),
            None => log::debug!("No standard for item {item_id}; {count} counts earn no credit"),
        }
    }

    SessionMetrics {
        runtime_ms,
        worked_time_ms,
        time_credit_ms: (credit_s * 1000.0).round() as i64,
        valid_count,
        misfeed_count,
        active_stations: stations.len(),
    }
}

/// Build one live bucket from every session that overlaps it.
///
/// The bucket's width is its covered window, so a bucket with no runtime
/// still counts fully as downtime.
pub fn reconstruct_bucket(
    bucket: &DayBucket,
    sessions: &[SessionRecord],
    standards: &HashMap<String, f64>,
    no_operator_id: &str,
) -> BucketContribution {
    let window = bucket.window();
    let mut aggregate = Aggregate::default();
    let mut contributing = 0usize;
    let mut entity_name = None;

    for session in sessions {
        let clipped = clip(session, &window);
        let m = recalc(&clipped, standards, no_operator_id);
        if m.runtime_ms == 0 && m.valid_count + m.misfeed_count == 0 {
            continue;
        }
        contributing += 1;
        if session.entity_name.is_some() {
            entity_name = session.entity_name.clone();
        }
        aggregate.runtime_ms += m.runtime_ms;
        aggregate.worked_time_ms += m.worked_time_ms;
        aggregate.time_credit_ms += m.time_credit_ms;
        aggregate.valid_count += m.valid_count;
        aggregate.misfeed_count += m.misfeed_count;
    }

    let width = window.duration_ms();
    aggregate.window_ms = Some(width);
    aggregate.downtime_ms = (width - aggregate.runtime_ms).max(0);

    BucketContribution {
        date_key: bucket.date_key.clone(),
        source: BucketSource::Live,
        aggregate,
        entity_name,
        found: contributing > 0,
        contributing_sessions: contributing,
    }
}

/// Narrow `window` to the span the sessions actually cover: from the first
/// session start to the last session end (or the window end while a session
/// is still open). Returns `None` when no session touches the window.
pub fn bookend_window(sessions: &[SessionRecord], window: &TimeWindow) -> Option<TimeWindow> {
    let overlapping: Vec<&SessionRecord> = sessions
        .iter()
        .filter(|s| s.start < window.end && s.end.map_or(true, |e| e > window.start))
        .collect();
    let first = overlapping.iter().map(|s| s.start).min()?;
    let last = overlapping
        .iter()
        .map(|s| s.end.unwrap_or(window.end))
        .max()?;
    let start = first.max(window.start);
    let end = last.min(window.end);
    (start < end).then(|| TimeWindow::raw(start, end))
}
