//! Cache path: read precomputed daily rollup rows for complete-day buckets.
//!
//! Rows are consumed whole. A rollup is never clipped or scaled, because its
//! contents cannot be split by time of day.

use chrono::{DateTime, Utc};

use crate::date_util::span_ms;
use crate::error::Result;
use crate::metrics::merge::BucketContribution;
use crate::metrics::types::Aggregate;
use crate::query::partition::{BucketSource, DayBucket};
use crate::query::window::TimeWindow;
use crate::records::{EntityType, RollupRecord};
use crate::storage::RollupStore;

/// Width of the span `record` accounts for, limited to the bucket. Rows
/// without a recorded span cover the bucket up to `now`.
fn covered_ms(record: &RollupRecord, bucket: &DayBucket, now: DateTime<Utc>) -> i64 {
    match record.covered_window {
        Some(cw) => TimeWindow::raw(cw.start, cw.end)
            .intersect(&bucket.window())
            .map_or(0, |w| w.duration_ms()),
        None => span_ms(bucket.start, bucket.end.min(now)),
    }
}

/// Pick one row when the store returned several for the same entity and
/// day: the one covering the most of the bucket, then the one ending latest.
pub fn select_record<'a>(
    records: impl IntoIterator<Item = &'a RollupRecord>,
    bucket: &DayBucket,
    now: DateTime<Utc>,
) -> Option<&'a RollupRecord> {
    records.into_iter().max_by_key(|r| {
        (
            r.covered_window.is_some(),
            covered_ms(r, bucket, now),
            r.covered_window.map(|cw| cw.end),
        )
    })
}

/// Translate a rollup row into the shared aggregate shape.
pub fn rollup_aggregate(record: &RollupRecord, bucket: &DayBucket, now: DateTime<Utc>) -> Aggregate {
    let window_ms = covered_ms(record, bucket, now);
    let downtime_ms = record.paused_time_ms + record.fault_time_ms;
    if record.runtime_ms + downtime_ms != window_ms {
        log::debug!(
            "Rollup {}/{} on {}: runtime {} + downtime {} != covered {}",
            record.entity_type,
            record.entity_key,
            record.date_key,
            record.runtime_ms,
            downtime_ms,
            window_ms
        );
    }
    Aggregate {
        runtime_ms: record.runtime_ms,
        downtime_ms,
        window_ms: Some(window_ms),
        worked_time_ms: record.worked_time_ms,
        time_credit_ms: record.time_credit_ms,
        valid_count: record.valid_count,
        misfeed_count: record.misfeed_count,
    }
}

/// Fetch the rollup for one entity and one cache bucket.
///
/// A missing row is not an error: the bucket contributes zero activity over
/// its full width and is listed in the entity's diagnostics.
pub async fn fetch_bucket(
    store: &dyn RollupStore,
    entity_type: EntityType,
    entity_key: &str,
    bucket: &DayBucket,
    now: DateTime<Utc>,
) -> Result<BucketContribution> {
    let keys = [entity_key.to_string()];
    let records = store
        .query_rollups(entity_type, std::slice::from_ref(&bucket.date_key), Some(&keys[..]))
        .await?;

    let matching = records
        .iter()
        .filter(|r| r.entity_key == entity_key && r.date_key == bucket.date_key);
    let contribution = match select_record(matching, bucket, now) {
        Some(record) => BucketContribution {
            date_key: bucket.date_key.clone(),
            source: BucketSource::Cache,
            aggregate: rollup_aggregate(record, bucket, now),
            entity_name: record.entity_name.clone(),
            found: true,
            contributing_sessions: 0,
        },
        None => {
            log::debug!("No rollup for {entity_type} {entity_key} on {}", bucket.date_key);
            BucketContribution {
                date_key: bucket.date_key.clone(),
                source: BucketSource::Cache,
                aggregate: Aggregate::idle(span_ms(bucket.start, bucket.end.min(now))),
                entity_name: None,
                found: false,
                contributing_sessions: 0,
            }
        }
    };
    Ok(contribution)
}
