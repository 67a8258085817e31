//! Ratios derived from an [`Aggregate`]. Every path (rollup, live, status)
//! goes through these functions so the same numbers give the same ratios.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::metrics::types::{Aggregate, PerformanceMetrics, Ratio};

/// Upper bound applied to efficiency (and therefore OEE).
///
/// Running faster than standard legitimately yields efficiency above 1, so
/// the default leaves it unclamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClampPolicy {
    None,
    /// Clamp to `[0, 1]`.
    Unit,
    /// Clamp to `[0, max]`.
    Max(f64),
}

impl ClampPolicy {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            ClampPolicy::None => value,
            ClampPolicy::Unit => value.clamp(0.0, 1.0),
            ClampPolicy::Max(max) => value.clamp(0.0, *max),
        }
    }
}

impl FromStr for ClampPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "none" | "unclamped" => return Ok(ClampPolicy::None),
            "unit" => return Ok(ClampPolicy::Unit),
            _ => {}
        }
        if let Some(rest) = s.strip_prefix("max:") {
            let max: f64 = rest
                .parse()
                .map_err(|_| Error::Config(format!("invalid clamp bound: {rest}")))?;
            if max.is_finite() && max > 0.0 {
                return Ok(ClampPolicy::Max(max));
            }
            return Err(Error::Config(format!("clamp bound must be positive: {rest}")));
        }
        Err(Error::Config(format!("clamp policy must be none, unit or max:<n>, got '{s}'")))
    }
}

impl fmt::Display for ClampPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClampPolicy::None => f.write_str("none"),
            ClampPolicy::Unit => f.write_str("unit"),
            ClampPolicy::Max(max) => write!(f, "max:{max}"),
        }
    }
}

pub fn availability(agg: &Aggregate) -> f64 {
    let window = agg.effective_window_ms();
    if window > 0 {
        (agg.runtime_ms as f64 / window as f64).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn throughput(agg: &Aggregate) -> f64 {
    let total = agg.total_count();
    if total > 0 {
        agg.valid_count as f64 / total as f64
    } else {
        0.0
    }
}

pub fn efficiency(agg: &Aggregate, clamp: ClampPolicy) -> f64 {
    if agg.worked_time_ms > 0 {
        let credit_s = agg.time_credit_ms as f64 / 1000.0;
        let worked_s = agg.worked_time_ms as f64 / 1000.0;
        clamp.apply(credit_s / worked_s)
    } else {
        0.0
    }
}

pub fn ratio(value: f64) -> Ratio {
    Ratio {
        value,
        percentage: round2(value * 100.0),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// All four ratios for an aggregate.
pub fn performance(agg: &Aggregate, clamp: ClampPolicy) -> PerformanceMetrics {
    let a = availability(agg);
    let t = throughput(agg);
    let e = efficiency(agg, clamp);
    PerformanceMetrics {
        availability: ratio(a),
        throughput: ratio(t),
        efficiency: ratio(e),
        oee: ratio(a * t * e),
    }
}
