//! Reindexing fetched rows onto the expected calendar.
//!
//! Every expected timestamp gets exactly one row. Timestamps the provider did
//! not return get a null row (no forward-fill of prices), and provider rows
//! that match no expected timestamp are dropped.

use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

use crate::calendar::{local_date, CalendarIndex};
use crate::domain::{BaseGranularity, OhlcvRow};

/// Align `rows` onto `expected`.
///
/// Daily rows match by market-local date and are moved onto the expected
/// timestamp; minute rows match by timestamp truncated to the minute. When
/// several rows match one slot the last one wins.
pub fn reindex(
    rows: Vec<OhlcvRow>,
    expected: &CalendarIndex,
    granularity: BaseGranularity,
    tz: Tz,
) -> Vec<OhlcvRow> {
    match granularity {
        BaseGranularity::Daily => {
            let mut by_date: HashMap<NaiveDate, OhlcvRow> = HashMap::with_capacity(rows.len());
            for row in rows {
                by_date.insert(local_date(row.timestamp, tz), row);
            }
            fill(expected, |ts| by_date.remove(&local_date(ts, tz)))
        }
        BaseGranularity::Minute => {
            let mut by_minute: HashMap<DateTime<Utc>, OhlcvRow> = HashMap::with_capacity(rows.len());
            for row in rows {
                by_minute.insert(truncate_minute(row.timestamp), row);
            }
            fill(expected, |ts| by_minute.remove(&truncate_minute(ts)))
        }
    }
}

fn fill<F>(expected: &CalendarIndex, mut take: F) -> Vec<OhlcvRow>
where
    F: FnMut(DateTime<Utc>) -> Option<OhlcvRow>,
{
    expected
        .timestamps()
        .iter()
        .map(|&ts| match take(ts) {
            Some(row) => row.at(ts),
            None => OhlcvRow::null(ts),
        })
        .collect()
}

fn truncate_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}
