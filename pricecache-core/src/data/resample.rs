//! Deriving coarser intervals from base-granularity rows.
//!
//! Buckets are the timestamps of the target interval's calendar index: a row
//! belongs to the latest index timestamp at or before it. Rows before the
//! first index timestamp are dropped, and so are buckets with no rows.

use chrono::{DateTime, Utc};

use crate::calendar::CalendarIndex;
use crate::domain::OhlcvRow;

/// Aggregate sorted, non-null rows into the buckets of `target`.
///
/// open = first present open, high = max, low = min, close and adj_close =
/// last present value, volume = sum of present volumes.
pub fn aggregate(rows: &[OhlcvRow], target: &CalendarIndex) -> Vec<OhlcvRow> {
    let buckets = target.timestamps();
    let bucket_of = |ts: DateTime<Utc>| -> Option<DateTime<Utc>> {
        let after = buckets.partition_point(|b| *b <= ts);
        after.checked_sub(1).map(|i| buckets[i])
    };

    let mut out: Vec<OhlcvRow> = Vec::new();
    for row in rows {
        let Some(bucket) = bucket_of(row.timestamp) else {
            continue;
        };
        match out.last_mut() {
            Some(current) if current.timestamp == bucket => fold(current, row),
            _ => out.push(row.clone().at(bucket)),
        }
    }
    out
}

fn fold(acc: &mut OhlcvRow, row: &OhlcvRow) {
    acc.open = acc.open.or(row.open);
    acc.high = max_opt(acc.high, row.high);
    acc.low = min_opt(acc.low, row.low);
    acc.close = row.close.or(acc.close);
    acc.adj_close = row.adj_close.or(acc.adj_close);
    acc.volume = match (acc.volume, row.volume) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (a, b) => a.or(b),
    };
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 8, 1, 13, 30, 0).unwrap()
    }

    fn minute_row(offset: i64, open: f64, close: f64, volume: u64) -> OhlcvRow {
        OhlcvRow {
            timestamp: t0() + TimeDelta::minutes(offset),
            open: Some(open),
            high: Some(open.max(close) + 0.5),
            low: Some(open.min(close) - 0.5),
            close: Some(close),
            adj_close: Some(close),
            volume: Some(volume),
        }
    }

    #[test]
    fn minutes_fold_into_five_minute_bars() {
        let rows: Vec<OhlcvRow> = (0..10).map(|i| minute_row(i, i as f64, i as f64 + 1.0, 10)).collect();
        let target = CalendarIndex::from_timestamps(vec![t0(), t0() + TimeDelta::minutes(5)]);
        let bars = aggregate(&rows, &target);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, t0());
        assert_eq!(bars[0].open, Some(0.0));
        assert_eq!(bars[0].close, Some(5.0));
        assert_eq!(bars[0].high, Some(5.5));
        assert_eq!(bars[0].low, Some(-0.5));
        assert_eq!(bars[0].volume, Some(50));
        assert_eq!(bars[1].open, Some(5.0));
    }

    #[test]
    fn rows_before_first_bucket_are_dropped() {
        let rows = vec![minute_row(-1, 1.0, 1.0, 1), minute_row(0, 2.0, 2.0, 1)];
        let target = CalendarIndex::from_timestamps(vec![t0()]);
        let bars = aggregate(&rows, &target);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, Some(2.0));
    }

    #[test]
    fn empty_buckets_are_skipped() {
        let rows = vec![minute_row(0, 1.0, 1.0, 1), minute_row(20, 2.0, 2.0, 1)];
        let target = CalendarIndex::from_timestamps(
            (0..5).map(|i| t0() + TimeDelta::minutes(5 * i)).collect(),
        );
        let bars = aggregate(&rows, &target);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].timestamp, t0() + TimeDelta::minutes(20));
    }

    #[test]
    fn missing_values_do_not_erase_present_ones() {
        let mut partial = minute_row(1, 9.0, 9.0, 5);
        partial.close = None;
        partial.volume = None;
        let rows = vec![minute_row(0, 1.0, 2.0, 7), partial];
        let target = CalendarIndex::from_timestamps(vec![t0()]);
        let bars = aggregate(&rows, &target);
        assert_eq!(bars[0].close, Some(2.0));
        assert_eq!(bars[0].volume, Some(7));
        assert_eq!(bars[0].high, Some(9.5));
    }
}
