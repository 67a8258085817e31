use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};
use regex::Regex;
use serde::Serialize;

use crate::date_util::{date_key, end_of_day, local_date, parse_timestamp, span_ms, start_of_day};
use crate::error::{Error, Result};

static RE_HOURS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,4})[hH]$").unwrap());
static RE_DAYS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,4})[dD]$").unwrap());
static RE_DAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// A validated, half-open query window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Validate a requested window. An `end` in the future is clamped to `now`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::Validation(format!(
                "start ({}) must be before end ({})",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        let end = end.min(now);
        if start >= end {
            return Err(Error::Validation(format!(
                "window starts in the future ({})",
                start.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Build a window without validation. Callers guarantee `start <= end`.
    pub(crate) fn raw(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> i64 {
        span_ms(self.start, self.end)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn intersect(&self, other: &TimeWindow) -> Option<TimeWindow> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeWindow { start, end })
    }
}

/// A window expressed relative to "now" or as calendar dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSpec {
    Today,
    Yesterday,
    WeekToDate,
    MonthToDate,
    LastHours(u32),
    LastDays(u32),
    Day(NaiveDate),
    Range(DateTime<Utc>, DateTime<Utc>),
}

impl WindowSpec {
    /// Parse a window string.
    ///
    /// Supported formats:
    /// - `today`, `yesterday`
    /// - `wtd`: week to date (ISO week, Monday start)
    /// - `mtd`: month to date
    /// - `8h`: the last N hours
    /// - `7d`: the last N days
    /// - `2025-03-10`: one calendar day
    /// - `<timestamp>..<timestamp>`: explicit range
    ///
    /// Calendar forms are read in `zone`.
    pub fn parse(s: &str, zone: &FixedOffset) -> Result<Self> {
        let s = s.trim();

        match s.to_lowercase().as_str() {
            "today" => return Ok(WindowSpec::Today),
            "yesterday" => return Ok(WindowSpec::Yesterday),
            "wtd" => return Ok(WindowSpec::WeekToDate),
            "mtd" => return Ok(WindowSpec::MonthToDate),
            _ => {}
        }

        if let Some((a, b)) = s.split_once("..") {
            return Ok(WindowSpec::Range(
                parse_timestamp(a, zone)?,
                parse_timestamp(b, zone)?,
            ));
        }

        if let Some(caps) = RE_HOURS.captures(s) {
            let n: u32 = caps[1]
                .parse()
                .map_err(|_| Error::Validation(format!("invalid hour count: {s}")))?;
            if n > 0 {
                return Ok(WindowSpec::LastHours(n));
            }
        }

        if let Some(caps) = RE_DAYS.captures(s) {
            let n: u32 = caps[1]
                .parse()
                .map_err(|_| Error::Validation(format!("invalid day count: {s}")))?;
            if n > 0 {
                return Ok(WindowSpec::LastDays(n));
            }
        }

        if RE_DAY.is_match(s) {
            let d = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| Error::Validation(format!("invalid date: {s}")))?;
            return Ok(WindowSpec::Day(d));
        }

        Err(Error::Validation(format!("unrecognized window: {s}")))
    }

    /// Resolve to concrete instants and validate.
    pub fn resolve(&self, now: DateTime<Utc>, zone: &FixedOffset) -> Result<TimeWindow> {
        let today = local_date(now, zone);
        let (start, end) = match self {
            WindowSpec::Today => (start_of_day(today, zone), now),
            WindowSpec::Yesterday => {
                let y = today - Duration::days(1);
                (start_of_day(y, zone), end_of_day(y, zone))
            }
            WindowSpec::WeekToDate => {
                let iw = today.iso_week();
                let monday = NaiveDate::from_isoywd_opt(iw.year(), iw.week(), Weekday::Mon)
                    .ok_or_else(|| Error::Validation("cannot resolve current week".into()))?;
                (start_of_day(monday, zone), now)
            }
            WindowSpec::MonthToDate => {
                let first = today
                    .with_day(1)
                    .ok_or_else(|| Error::Validation("cannot resolve current month".into()))?;
                (start_of_day(first, zone), now)
            }
            WindowSpec::LastHours(n) => (now - Duration::hours(*n as i64), now),
            WindowSpec::LastDays(n) => (now - Duration::days(*n as i64), now),
            WindowSpec::Day(d) => (start_of_day(*d, zone), end_of_day(*d, zone)),
            WindowSpec::Range(a, b) => (*a, *b),
        };
        TimeWindow::new(start, end, now)
    }

    pub fn to_key(&self) -> String {
        match self {
            WindowSpec::Today => "today".into(),
            WindowSpec::Yesterday => "yesterday".into(),
            WindowSpec::WeekToDate => "wtd".into(),
            WindowSpec::MonthToDate => "mtd".into(),
            WindowSpec::LastHours(n) => format!("{n}h"),
            WindowSpec::LastDays(n) => format!("{n}d"),
            WindowSpec::Day(d) => date_key(*d),
            WindowSpec::Range(a, b) => format!("{}..{}", a.to_rfc3339(), b.to_rfc3339()),
        }
    }
}

impl std::fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn zone() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_window_rejects_inverted_and_empty() {
        let now = utc("2025-03-12T10:00:00Z");
        let a = utc("2025-03-10T08:00:00Z");
        assert!(matches!(TimeWindow::new(a, a, now), Err(Error::Validation(_))));
        assert!(TimeWindow::new(a + Duration::hours(1), a, now).is_err());
    }

    #[test]
    fn test_window_end_clamped_to_now() {
        let now = utc("2025-03-12T10:00:00Z");
        let w = TimeWindow::new(utc("2025-03-12T08:00:00Z"), utc("2025-03-13T00:00:00Z"), now).unwrap();
        assert_eq!(w.end, now);

        // Entirely in the future
        let e = TimeWindow::new(utc("2025-03-12T11:00:00Z"), utc("2025-03-12T12:00:00Z"), now);
        assert!(e.is_err());
    }

    #[test]
    fn test_intersect_and_contains() {
        let w = TimeWindow::raw(utc("2025-03-10T08:00:00Z"), utc("2025-03-10T12:00:00Z"));
        let o = TimeWindow::raw(utc("2025-03-10T11:00:00Z"), utc("2025-03-10T14:00:00Z"));
        assert_eq!(
            w.intersect(&o),
            Some(TimeWindow::raw(utc("2025-03-10T11:00:00Z"), utc("2025-03-10T12:00:00Z")))
        );
        let disjoint = TimeWindow::raw(utc("2025-03-10T12:00:00Z"), utc("2025-03-10T13:00:00Z"));
        assert_eq!(w.intersect(&disjoint), None);
        assert!(w.contains(w.start));
        assert!(!w.contains(w.end));
    }

    #[test]
    fn test_parse_relative() {
        assert_eq!(WindowSpec::parse("today", &zone()).unwrap(), WindowSpec::Today);
        assert_eq!(WindowSpec::parse("Yesterday", &zone()).unwrap(), WindowSpec::Yesterday);
        assert_eq!(WindowSpec::parse("8h", &zone()).unwrap(), WindowSpec::LastHours(8));
        assert_eq!(WindowSpec::parse("30d", &zone()).unwrap(), WindowSpec::LastDays(30));
        assert_eq!(WindowSpec::parse("mtd", &zone()).unwrap(), WindowSpec::MonthToDate);
    }

    #[test]
    fn test_parse_calendar_and_range() {
        assert_eq!(
            WindowSpec::parse("2025-03-10", &zone()).unwrap(),
            WindowSpec::Day(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
        );
        assert_eq!(
            WindowSpec::parse("2025-03-10 08:00..2025-03-10T12:00:00Z", &zone()).unwrap(),
            WindowSpec::Range(utc("2025-03-10T08:00:00Z"), utc("2025-03-10T12:00:00Z"))
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(WindowSpec::parse("garbage", &zone()).is_err());
        assert!(WindowSpec::parse("0h", &zone()).is_err());
        assert!(WindowSpec::parse("2025-13-40", &zone()).is_err());
        assert!(WindowSpec::parse("2025-03-10..soon", &zone()).is_err());
    }

    #[test]
    fn test_resolve() {
        let now = utc("2025-03-12T10:00:00Z"); // a Wednesday
        let z = zone();
        assert_eq!(
            WindowSpec::Today.resolve(now, &z).unwrap(),
            TimeWindow::raw(utc("2025-03-12T00:00:00Z"), now)
        );
        assert_eq!(
            WindowSpec::Yesterday.resolve(now, &z).unwrap(),
            TimeWindow::raw(utc("2025-03-11T00:00:00Z"), utc("2025-03-12T00:00:00Z"))
        );
        assert_eq!(
            WindowSpec::WeekToDate.resolve(now, &z).unwrap().start,
            utc("2025-03-10T00:00:00Z")
        );
        assert_eq!(
            WindowSpec::MonthToDate.resolve(now, &z).unwrap().start,
            utc("2025-03-01T00:00:00Z")
        );
        assert_eq!(
            WindowSpec::LastHours(8).resolve(now, &z).unwrap().start,
            utc("2025-03-12T02:00:00Z")
        );
        // A calendar day that includes now is clamped
        let d = WindowSpec::Day(NaiveDate::from_ymd_opt(2025, 3, 12).unwrap());
        assert_eq!(d.resolve(now, &z).unwrap().end, now);
    }

    #[test]
    fn test_to_key() {
        assert_eq!(WindowSpec::LastHours(8).to_key(), "8h");
        assert_eq!(WindowSpec::LastDays(7).to_key(), "7d");
        assert_eq!(
            WindowSpec::Day(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()).to_key(),
            "2025-03-10"
        );
    }
}
