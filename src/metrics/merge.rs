use std::iter::Sum;
use std::ops::Add;

use crate::metrics::types::{Aggregate, Diagnostics};
use crate::query::partition::BucketSource;

impl Aggregate {
    /// Field-wise sum of two aggregates.
    ///
    /// The covered window adds up independently of runtime. If either side
    /// tracked an explicit window, the other side contributes its effective
    /// window so the total stays consistent whatever the grouping.
    pub fn merge(&self, other: &Aggregate) -> Aggregate {
        let window_ms = match (self.window_ms, other.window_ms) {
            (None, None) => None,
            _ => Some(self.effective_window_ms() + other.effective_window_ms()),
        };
        Aggregate {
            runtime_ms: self.runtime_ms + other.runtime_ms,
            downtime_ms: self.downtime_ms + other.downtime_ms,
            window_ms,
            worked_time_ms: self.worked_time_ms + other.worked_time_ms,
            time_credit_ms: self.time_credit_ms + other.time_credit_ms,
            valid_count: self.valid_count + other.valid_count,
            misfeed_count: self.misfeed_count + other.misfeed_count,
        }
    }
}

impl Add for Aggregate {
    type Output = Aggregate;

    fn add(self, rhs: Aggregate) -> Aggregate {
        self.merge(&rhs)
    }
}

impl Sum for Aggregate {
    fn sum<I: Iterator<Item = Aggregate>>(iter: I) -> Aggregate {
        iter.fold(Aggregate::default(), |acc, a| acc.merge(&a))
    }
}

impl<'a> Sum<&'a Aggregate> for Aggregate {
    fn sum<I: Iterator<Item = &'a Aggregate>>(iter: I) -> Aggregate {
        iter.fold(Aggregate::default(), |acc, a| acc.merge(a))
    }
}

/// The numbers one bucket produced for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketContribution {
    pub date_key: String,
    pub source: BucketSource,
    pub aggregate: Aggregate,
    pub entity_name: Option<String>,
    /// Whether the bucket had any data for the entity: a rollup row for
    /// cache buckets, at least one contributing session for live ones.
    pub found: bool,
    pub contributing_sessions: usize,
}

/// Folds bucket contributions for one entity.
///
/// Identity (key and display name) is carried beside the numbers and never
/// derived from them: the most recent non-empty name, in bucket order, wins.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityAccumulator {
    pub entity_key: String,
    pub entity_name: Option<String>,
    pub aggregate: Aggregate,
    pub diagnostics: Diagnostics,
    found_any: bool,
}

impl EntityAccumulator {
    pub fn new(entity_key: impl Into<String>) -> Self {
        Self {
            entity_key: entity_key.into(),
            entity_name: None,
            aggregate: Aggregate::default(),
            diagnostics: Diagnostics::default(),
            found_any: false,
        }
    }

    pub fn add(&mut self, contribution: BucketContribution) {
        self.aggregate = self.aggregate.merge(&contribution.aggregate);
        if let Some(name) = contribution.entity_name.filter(|n| !n.trim().is_empty()) {
            self.entity_name = Some(name);
        }
        match contribution.source {
            BucketSource::Cache => {
                self.diagnostics.cache_buckets += 1;
                if !contribution.found {
                    self.diagnostics.missing_rollup_days.push(contribution.date_key.clone());
                }
            }
            BucketSource::Live => self.diagnostics.live_buckets += 1,
        }
        self.diagnostics.contributing_sessions += contribution.contributing_sessions;
        self.diagnostics.bucket_days.push(contribution.date_key);
        self.found_any |= contribution.found;
    }

    /// True once any bucket produced data for this entity.
    pub fn has_data(&self) -> bool {
        self.found_any
    }

    pub fn display_name(&self) -> String {
        self.entity_name.clone().unwrap_or_else(|| "Unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(runtime: i64, window: Option<i64>, valid: u64) -> Aggregate {
        Aggregate {
            runtime_ms: runtime,
            downtime_ms: 1_000,
            window_ms: window,
            worked_time_ms: runtime * 2,
            time_credit_ms: runtime / 2,
            valid_count: valid,
            misfeed_count: valid / 10,
        }
    }

    #[test]
    fn test_merge_adds_fields() {
        let m = a(10_000, Some(20_000), 50).merge(&a(5_000, Some(10_000), 20));
        assert_eq!(m.runtime_ms, 15_000);
        assert_eq!(m.downtime_ms, 2_000);
        assert_eq!(m.window_ms, Some(30_000));
        assert_eq!(m.worked_time_ms, 30_000);
        assert_eq!(m.time_credit_ms, 7_500);
        assert_eq!(m.valid_count, 70);
        assert_eq!(m.misfeed_count, 7);
    }

    #[test]
    fn test_merge_algebra() {
        let cases = [
            (a(10_000, Some(20_000), 50), a(5_000, None, 20), a(0, Some(86_400_000), 0)),
            (a(1, None, 1), a(2, None, 2), a(3, None, 3)),
            (Aggregate::idle(3_600_000), a(7, Some(9), 4), Aggregate::default()),
        ];
        for (x, y, z) in cases {
            let left = x.merge(&y).merge(&z);
            let right = x.merge(&y.merge(&z));
            let swapped = y.merge(&x.merge(&z));
            assert_eq!(left, right);
            assert_eq!(left, swapped);
            assert_eq!(x.merge(&y), y.merge(&x));
        }
    }

    #[test]
    fn test_default_is_identity() {
        let x = a(10_000, Some(20_000), 50);
        assert_eq!(x.merge(&Aggregate::default()).window_ms, Some(20_000));
        assert_eq!(x.merge(&Aggregate::default()).runtime_ms, 10_000);
        // Window-less default merged with window-less aggregate stays window-less
        let y = a(10, None, 1);
        assert_eq!(y.merge(&Aggregate::default()), y);
    }

    #[test]
    fn test_zero_runtime_bucket_still_adds_window() {
        let busy = a(3_600_000, Some(3_600_000), 10);
        let idle = Aggregate::idle(3_600_000);
        let m = busy.merge(&idle);
        assert_eq!(m.window_ms, Some(7_200_000));
        assert_eq!(m.runtime_ms, 3_600_000);
    }

    #[test]
    fn test_sum() {
        let parts = vec![a(1, Some(2), 1), a(2, Some(3), 2), a(3, Some(4), 3)];
        let total: Aggregate = parts.iter().sum();
        assert_eq!(total.runtime_ms, 6);
        assert_eq!(total.window_ms, Some(9));
        let owned: Aggregate = parts.into_iter().sum();
        assert_eq!(owned, total);
    }

    #[test]
    fn test_accumulator_name_and_diagnostics() {
        let mut acc = EntityAccumulator::new("67808");
        acc.add(BucketContribution {
            date_key: "2025-03-10".into(),
            source: BucketSource::Live,
            aggregate: a(1_000, Some(2_000), 3),
            entity_name: Some("SPF1".into()),
            found: true,
            contributing_sessions: 2,
        });
        acc.add(BucketContribution {
            date_key: "2025-03-11".into(),
            source: BucketSource::Cache,
            aggregate: Aggregate::idle(86_400_000),
            entity_name: None,
            found: false,
            contributing_sessions: 0,
        });
        acc.add(BucketContribution {
            date_key: "2025-03-12".into(),
            source: BucketSource::Cache,
            aggregate: a(5_000, Some(86_400_000), 7),
            entity_name: Some("  ".into()),
            found: true,
            contributing_sessions: 0,
        });

        assert!(acc.has_data());
        assert_eq!(acc.display_name(), "SPF1");
        assert_eq!(acc.aggregate.valid_count, 10);
        assert_eq!(acc.aggregate.window_ms, Some(2_000 + 2 * 86_400_000));
        assert_eq!(acc.diagnostics.cache_buckets, 2);
        assert_eq!(acc.diagnostics.live_buckets, 1);
        assert_eq!(acc.diagnostics.missing_rollup_days, vec!["2025-03-11".to_string()]);
        assert_eq!(acc.diagnostics.contributing_sessions, 2);
        assert_eq!(acc.diagnostics.bucket_days, vec!["2025-03-10", "2025-03-11", "2025-03-12"]);
    }

    #[test]
    fn test_accumulator_without_data() {
        let mut acc = EntityAccumulator::new("1");
        acc.add(BucketContribution {
            date_key: "2025-03-10".into(),
            source: BucketSource::Cache,
            aggregate: Aggregate::idle(86_400_000),
            entity_name: None,
            found: false,
            contributing_sessions: 0,
        });
        assert!(!acc.has_data());
        assert_eq!(acc.display_name(), "Unknown");
    }
}
