//! Fixed-width re-bucketing of a single raw series

use std::collections::BTreeMap;

use crate::{TimeSeriesPoint, bucket_start};

/// Re-bucket a series into `width`-second buckets, keeping the newest `keep`
///
/// Each bucket is stamped with its start and carries the value of the latest
/// observation inside it. The result is ascending.
#[must_use]
pub fn resample_latest(points: &[TimeSeriesPoint], width: i64, keep: usize) -> Vec<TimeSeriesPoint> {
    let mut buckets: BTreeMap<i64, TimeSeriesPoint> = BTreeMap::new();
    for point in points {
        let start = bucket_start(point.timestamp, width.max(1));
        match buckets.get(&start) {
            Some(existing) if existing.timestamp > point.timestamp => {}
            _ => {
                buckets.insert(start, *point);
            }
        }
    }

    let skip = buckets.len().saturating_sub(keep);
    buckets
        .into_iter()
        .skip(skip)
        .map(|(start, point)| TimeSeriesPoint::new(start, point.value))
        .collect()
}
