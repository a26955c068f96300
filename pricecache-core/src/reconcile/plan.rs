//! Deciding what to fetch.
//!
//! The diff runs on market-local dates, not timestamps: a day counts as
//! present when the store holds any row for it. Intraday feeds routinely
//! skip individual ticks, so a timestamp diff would refetch days that are
//! as complete as the provider will ever make them. The cost is that a day
//! missing only some ticks is never topped up.

use chrono::NaiveDate;
use chrono_tz::Tz;
use std::collections::BTreeSet;

use crate::calendar::{local_date, CalendarIndex};
use crate::domain::CachedSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// The range holds no trading sessions.
    NoSessions,
    /// Every expected date is already stored.
    UpToDate,
    /// Fetch the dates `[start, end]`; `missing` of them are absent.
    Fetch {
        start: NaiveDate,
        end: NaiveDate,
        missing: usize,
    },
}

/// Diff the expected index against what is stored.
///
/// Null rows count as present unless `refetch_null_rows` is set.
pub fn plan_fetch(
    expected: &CalendarIndex,
    stored: Option<&CachedSeries>,
    tz: Tz,
    refetch_null_rows: bool,
) -> FetchPlan {
    if expected.is_empty() {
        return FetchPlan::NoSessions;
    }
    let present: BTreeSet<NaiveDate> = stored
        .map(|series| {
            series
                .rows()
                .iter()
                .filter(|row| !(refetch_null_rows && row.is_null()))
                .map(|row| local_date(row.timestamp, tz))
                .collect()
        })
        .unwrap_or_default();

    let missing: Vec<NaiveDate> = expected.dates(tz).difference(&present).copied().collect();
    match (missing.first(), missing.last()) {
        (Some(&start), Some(&end)) => FetchPlan::Fetch {
            start,
            end,
            missing: missing.len(),
        },
        _ => FetchPlan::UpToDate,
    }
}
