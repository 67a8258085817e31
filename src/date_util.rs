use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::{Error, Result};

/// Calendar date of `ts` in the given zone.
pub fn local_date(ts: DateTime<Utc>, zone: &FixedOffset) -> NaiveDate {
    ts.with_timezone(zone).date_naive()
}

/// Instant at which `date` begins in the given zone.
pub fn start_of_day(date: NaiveDate, zone: &FixedOffset) -> DateTime<Utc> {
    let local_midnight = date.and_time(NaiveTime::MIN);
    let utc = local_midnight - Duration::seconds(zone.local_minus_utc() as i64);
    Utc.from_utc_datetime(&utc)
}

/// Instant at which `date` ends (the next day's midnight) in the given zone.
pub fn end_of_day(date: NaiveDate, zone: &FixedOffset) -> DateTime<Utc> {
    start_of_day(date + Duration::days(1), zone)
}

/// Align down to the start of the containing day.
pub fn floor_to_day(ts: DateTime<Utc>, zone: &FixedOffset) -> DateTime<Utc> {
    start_of_day(local_date(ts, zone), zone)
}

/// Align up to the next midnight, or return `ts` if it already is one.
pub fn ceil_to_day(ts: DateTime<Utc>, zone: &FixedOffset) -> DateTime<Utc> {
    if is_midnight(ts, zone) {
        ts
    } else {
        end_of_day(local_date(ts, zone), zone)
    }
}

pub fn is_midnight(ts: DateTime<Utc>, zone: &FixedOffset) -> bool {
    floor_to_day(ts, zone) == ts
}

/// Canonical `YYYY-MM-DD` key used by the rollup store.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a UTC offset such as `+02:00`, `-0530`, `Z` or `UTC`.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| Error::Config(format!("invalid UTC offset: {s}")));
    }
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(Error::Config(format!("invalid UTC offset: {s}"))),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Config(format!("invalid UTC offset: {s}")));
    }
    let hours: i32 = digits[..2].parse().map_err(|_| Error::Config(format!("invalid UTC offset: {s}")))?;
    let minutes: i32 = digits[2..].parse().map_err(|_| Error::Config(format!("invalid UTC offset: {s}")))?;
    if hours > 23 || minutes > 59 {
        return Err(Error::Config(format!("invalid UTC offset: {s}")));
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| Error::Config(format!("invalid UTC offset: {s}")))
}

/// Parse a user-supplied timestamp.
///
/// Accepts RFC 3339, epoch milliseconds, `YYYY-MM-DD HH:MM[:SS]` (also with
/// a `T` separator) and bare `YYYY-MM-DD`. Values without an offset are read
/// in `zone`.
pub fn parse_timestamp(s: &str, zone: &FixedOffset) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| Error::Validation(format!("unparsable timestamp: {s}")));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(from_local(naive, zone));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(start_of_day(date, zone));
    }
    Err(Error::Validation(format!("unparsable timestamp: {s}")))
}

fn from_local(naive: NaiveDateTime, zone: &FixedOffset) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(naive - Duration::seconds(zone.local_minus_utc() as i64)))
}

/// Milliseconds between two instants, never negative.
pub fn span_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}
