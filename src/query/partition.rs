use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::date_util::{ceil_to_day, date_key, end_of_day, floor_to_day, local_date, span_ms, start_of_day};
use crate::error::{Error, Result};
use crate::query::window::TimeWindow;

/// Which path produces a bucket's numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketSource {
    /// Precomputed daily rollup rows, consumed whole.
    Cache,
    /// Sessions reconstructed and clipped to the bucket.
    Live,
}

impl FromStr for BucketSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cache" => Ok(BucketSource::Cache),
            "live" => Ok(BucketSource::Live),
            other => Err(Error::Config(format!("bucket source must be cache or live, got '{other}'"))),
        }
    }
}

impl fmt::Display for BucketSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BucketSource::Cache => "cache",
            BucketSource::Live => "live",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    /// A whole calendar day strictly inside the window.
    CompleteDay,
    /// A leading or trailing piece of a day.
    Fragment,
    /// A fragment of the current day widened to the full day.
    PromotedToday,
    /// A short window that was not split at all.
    Unsplit,
}

/// One calendar-day slice of a query window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayBucket {
    pub date_key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: BucketSource,
    pub kind: BucketKind,
    /// The exact part of the query this bucket answers for. Equal to
    /// `[start, end)` except for cache-served partial days, which span the
    /// whole day.
    pub requested: TimeWindow,
}

impl DayBucket {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::raw(self.start, self.end)
    }

    pub fn width_ms(&self) -> i64 {
        span_ms(self.start, self.end)
    }
}

/// The bucket plan for one query window, ordered by start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub buckets: Vec<DayBucket>,
}

impl Partition {
    pub fn complete_days(&self) -> impl Iterator<Item = &DayBucket> {
        self.buckets.iter().filter(|b| b.kind == BucketKind::CompleteDay)
    }

    pub fn partial_fragments(&self) -> impl Iterator<Item = &DayBucket> {
        self.buckets.iter().filter(|b| b.kind != BucketKind::CompleteDay)
    }

    pub fn count(&self, source: BucketSource) -> usize {
        self.buckets.iter().filter(|b| b.source == source).count()
    }

    /// True when the requested ranges tile `window` with no gap or overlap.
    pub fn covers(&self, window: &TimeWindow) -> bool {
        let mut cursor = window.start;
        for b in &self.buckets {
            if b.requested.start != cursor || b.requested.end <= b.requested.start {
                return false;
            }
            cursor = b.requested.end;
        }
        cursor == window.end
    }
}

/// Split `window` into day-aligned buckets.
///
/// Whole days inside the window come from the rollup store. The leading and
/// trailing partial days are reconstructed live, except a fragment that falls
/// on `now`'s calendar day: with `promote_today` set it is widened to the
/// entire day and read from the rollup store, which is kept current through
/// "now". That trade accepts activity outside the requested sub-range for
/// today in exchange for skipping session reconstruction.
pub fn partition(window: &TimeWindow, now: DateTime<Utc>, config: &EngineConfig) -> Partition {
    let zone = config.zone();
    let (start, end) = (window.start, window.end);

    let last_instant = end - Duration::milliseconds(1);
    let spans_midnight = floor_to_day(start, zone) != floor_to_day(last_instant, zone);
    let threshold_ms = config.hybrid_threshold_hours as i64 * 3_600_000;
    if !spans_midnight && window.duration_ms() <= threshold_ms {
        let day = local_date(start, zone);
        // A rollup row answers for its whole day, so a cache-served bucket
        // spans the day like a promoted one.
        let (bucket_start, bucket_end) = match config.short_window_source {
            BucketSource::Cache => (start_of_day(day, zone), end_of_day(day, zone)),
            BucketSource::Live => (start, end),
        };
        return Partition {
            buckets: vec![DayBucket {
                date_key: date_key(day),
                start: bucket_start,
                end: bucket_end,
                source: config.short_window_source,
                kind: BucketKind::Unsplit,
                requested: *window,
            }],
        };
    }

    let first_midnight = ceil_to_day(start, zone);
    let last_midnight = floor_to_day(end, zone);

    let mut fragments: Vec<TimeWindow> = Vec::new();
    let mut complete: Vec<TimeWindow> = Vec::new();
    if first_midnight > last_midnight {
        // No midnight inside the window at all.
        fragments.push(*window);
    } else {
        if start < first_midnight {
            fragments.push(TimeWindow::raw(start, first_midnight));
        }
        let mut cursor = first_midnight;
        while cursor < last_midnight {
            let next = end_of_day(local_date(cursor, zone), zone);
            complete.push(TimeWindow::raw(cursor, next));
            cursor = next;
        }
        if last_midnight < end {
            fragments.push(TimeWindow::raw(last_midnight, end));
        }
    }

    let today = local_date(now, zone);
    let mut buckets: Vec<DayBucket> = complete
        .into_iter()
        .map(|w| DayBucket {
            date_key: date_key(local_date(w.start, zone)),
            start: w.start,
            end: w.end,
            source: BucketSource::Cache,
            kind: BucketKind::CompleteDay,
            requested: w,
        })
        .collect();

    for frag in fragments {
        let day = local_date(frag.start, zone);
        let bucket = if config.promote_today && day == today {
            DayBucket {
                date_key: date_key(day),
                start: start_of_day(day, zone),
                end: end_of_day(day, zone),
                source: BucketSource::Cache,
                kind: BucketKind::PromotedToday,
                requested: frag,
            }
        } else {
            DayBucket {
                date_key: date_key(day),
                start: frag.start,
                end: frag.end,
                source: BucketSource::Live,
                kind: BucketKind::Fragment,
                requested: frag,
            }
        };
        buckets.push(bucket);
    }

    buckets.sort_by_key(|b| b.requested.start);
    log::debug!(
        "Partitioned {}..{} into {} buckets ({} cache, {} live)",
        start.to_rfc3339(),
        end.to_rfc3339(),
        buckets.len(),
        buckets.iter().filter(|b| b.source == BucketSource::Cache).count(),
        buckets.iter().filter(|b| b.source == BucketSource::Live).count(),
    );
    Partition { buckets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn window(a: &str, b: &str) -> TimeWindow {
        TimeWindow::raw(utc(a), utc(b))
    }

    fn config(threshold: u32) -> EngineConfig {
        EngineConfig {
            hybrid_threshold_hours: threshold,
            ..EngineConfig::default()
        }
    }

    const NOW: &str = "2025-03-20T15:00:00Z";

    #[test]
    fn test_short_window_not_split() {
        let w = window("2025-03-10T08:00:00Z", "2025-03-10T12:00:00Z");
        let p = partition(&w, utc(NOW), &config(24));
        assert_eq!(p.buckets.len(), 1);
        assert_eq!(p.buckets[0].kind, BucketKind::Unsplit);
        assert_eq!(p.buckets[0].source, BucketSource::Live);
        assert_eq!(p.buckets[0].window(), w);

        let mut c = config(24);
        c.short_window_source = BucketSource::Cache;
        let p = partition(&w, utc(NOW), &c);
        assert_eq!(p.buckets[0].source, BucketSource::Cache);
        assert_eq!(p.buckets[0].window(), window("2025-03-10T00:00:00Z", "2025-03-11T00:00:00Z"));
        assert_eq!(p.buckets[0].requested, w);
        assert!(p.covers(&w));
    }

    #[test]
    fn test_short_window_across_midnight_is_split() {
        let w = window("2025-03-10T20:00:00Z", "2025-03-11T04:00:00Z");
        let p = partition(&w, utc(NOW), &config(24));
        assert_eq!(p.buckets.len(), 2);
        assert_eq!(p.buckets[0].window(), window("2025-03-10T20:00:00Z", "2025-03-11T00:00:00Z"));
        assert_eq!(p.buckets[1].window(), window("2025-03-11T00:00:00Z", "2025-03-11T04:00:00Z"));
        assert!(p.buckets.iter().all(|b| b.source == BucketSource::Live));
        assert_eq!(p.buckets[0].date_key, "2025-03-10");
        assert_eq!(p.buckets[1].date_key, "2025-03-11");
    }

    #[test]
    fn test_multi_day_window() {
        let w = window("2025-03-10T06:00:00Z", "2025-03-13T18:00:00Z");
        let p = partition(&w, utc(NOW), &config(24));
        let keys: Vec<_> = p.buckets.iter().map(|b| (b.date_key.as_str(), b.source)).collect();
        assert_eq!(
            keys,
            vec![
                ("2025-03-10", BucketSource::Live),
                ("2025-03-11", BucketSource::Cache),
                ("2025-03-12", BucketSource::Cache),
                ("2025-03-13", BucketSource::Live),
            ]
        );
        assert_eq!(p.complete_days().count(), 2);
        assert_eq!(p.partial_fragments().count(), 2);
        assert!(p.covers(&w));
    }

    #[test]
    fn test_midnight_aligned_window_has_no_fragments() {
        let w = window("2025-03-10T00:00:00Z", "2025-03-12T00:00:00Z");
        let p = partition(&w, utc(NOW), &config(24));
        assert_eq!(p.buckets.len(), 2);
        assert!(p.buckets.iter().all(|b| b.kind == BucketKind::CompleteDay));
        assert!(p.covers(&w));
    }

    #[test]
    fn test_single_full_day_with_zero_threshold_is_cache() {
        let w = window("2025-03-10T00:00:00Z", "2025-03-11T00:00:00Z");
        let p = partition(&w, utc(NOW), &config(0));
        assert_eq!(p.buckets.len(), 1);
        assert_eq!(p.buckets[0].kind, BucketKind::CompleteDay);
        assert_eq!(p.buckets[0].source, BucketSource::Cache);
    }

    #[test]
    fn test_long_window_within_one_day_is_one_fragment() {
        let w = window("2025-03-10T02:00:00Z", "2025-03-10T20:00:00Z");
        let p = partition(&w, utc(NOW), &config(4));
        assert_eq!(p.buckets.len(), 1);
        assert_eq!(p.buckets[0].kind, BucketKind::Fragment);
        assert_eq!(p.buckets[0].window(), w);
    }

    #[test]
    fn test_today_fragment_promoted() {
        let now = utc(NOW);
        let w = window("2025-03-18T10:00:00Z", NOW);
        let p = partition(&w, now, &config(24));
        let last = p.buckets.last().unwrap();
        assert_eq!(last.kind, BucketKind::PromotedToday);
        assert_eq!(last.source, BucketSource::Cache);
        assert_eq!(last.window(), window("2025-03-20T00:00:00Z", "2025-03-21T00:00:00Z"));
        assert_eq!(last.requested, window("2025-03-20T00:00:00Z", NOW));
        // Requested ranges still tile the query exactly
        assert!(p.covers(&w));
    }

    #[test]
    fn test_today_promotion_can_be_disabled() {
        let now = utc(NOW);
        let w = window("2025-03-18T10:00:00Z", NOW);
        let mut c = config(24);
        c.promote_today = false;
        let p = partition(&w, now, &c);
        let last = p.buckets.last().unwrap();
        assert_eq!(last.kind, BucketKind::Fragment);
        assert_eq!(last.source, BucketSource::Live);
        assert_eq!(last.window(), window("2025-03-20T00:00:00Z", NOW));
    }

    #[test]
    fn test_offset_zone_day_boundaries() {
        let mut c = config(24);
        c.utc_offset = FixedOffset::east_opt(2 * 3600).unwrap();
        // Local 2025-03-10 12:00 .. 2025-03-12 12:00
        let w = window("2025-03-10T10:00:00Z", "2025-03-12T10:00:00Z");
        let p = partition(&w, utc(NOW), &c);
        assert_eq!(p.buckets.len(), 3);
        assert_eq!(p.buckets[1].date_key, "2025-03-11");
        assert_eq!(p.buckets[1].start, utc("2025-03-10T22:00:00Z"));
        assert_eq!(p.buckets[1].end, utc("2025-03-11T22:00:00Z"));
        assert!(p.covers(&w));
    }

    #[test]
    fn test_buckets_tile_every_window_in_grid() {
        let now = utc(NOW);
        let base = utc("2025-03-08T00:00:00Z");
        let mut c = config(24);
        c.promote_today = false;
        for start_h in (0..72).step_by(5) {
            for len_h in [1i64, 3, 23, 24, 25, 47, 48, 49, 100] {
                let start = base + Duration::hours(start_h) + Duration::minutes(17);
                let w = TimeWindow::new(start, start + Duration::hours(len_h), now).unwrap();
                for threshold in [0u32, 6, 24] {
                    c.hybrid_threshold_hours = threshold;
                    let p = partition(&w, now, &c);
                    assert!(p.covers(&w), "gap/overlap for {w:?} threshold {threshold}");
                    for b in &p.buckets {
                        assert_eq!(b.window(), b.requested);
                        assert!(b.width_ms() <= 86_400_000);
                    }
                }
            }
        }
    }
}
