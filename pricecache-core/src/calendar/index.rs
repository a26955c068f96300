//! CalendarIndex: every instant at which a row is expected.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;

use super::{local_date, MarketCalendar, Session};
use crate::domain::{DailyFrequency, Interval};

/// Ordered, duplicate-free expected timestamps for one
/// (calendar, date range, interval) triple.
///
/// Daily-or-coarser intervals get one timestamp per kept session, at the
/// session open. Intraday intervals get every tick from open to close, with
/// the close itself always included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarIndex {
    timestamps: Vec<DateTime<Utc>>,
}

impl CalendarIndex {
    pub fn compute(
        calendar: &dyn MarketCalendar,
        start: NaiveDate,
        end: NaiveDate,
        interval: &Interval,
    ) -> Self {
        let sessions = calendar.schedule(start, end);
        Self::from_sessions(&sessions, interval)
    }

    pub fn from_sessions(sessions: &[Session], interval: &Interval) -> Self {
        let mut timestamps = match interval.intraday_frequency() {
            Some(step) => intraday_ticks(sessions, step),
            None => decimate(sessions, interval.daily_frequency()),
        };
        timestamps.sort_unstable();
        timestamps.dedup();
        Self { timestamps }
    }

    /// Build an index directly from timestamps (sorted and deduplicated).
    pub fn from_timestamps(mut timestamps: Vec<DateTime<Utc>>) -> Self {
        timestamps.sort_unstable();
        timestamps.dedup();
        Self { timestamps }
    }

    /// Drop timestamps after `now`; data for them cannot exist yet.
    pub fn not_after(mut self, now: DateTime<Utc>) -> Self {
        let keep = self.timestamps.partition_point(|ts| *ts <= now);
        self.timestamps.truncate(keep);
        self
    }

    /// Timestamps whose market-local date is in `[start, end]`.
    pub fn between_dates(&self, start: NaiveDate, end: NaiveDate, tz: Tz) -> Self {
        Self {
            timestamps: self
                .timestamps
                .iter()
                .copied()
                .filter(|ts| {
                    let date = local_date(*ts, tz);
                    date >= start && date <= end
                })
                .collect(),
        }
    }

    /// Distinct market-local dates covered by the index.
    pub fn dates(&self, tz: Tz) -> BTreeSet<NaiveDate> {
        self.timestamps.iter().map(|ts| local_date(*ts, tz)).collect()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn first(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

fn intraday_ticks(sessions: &[Session], step: TimeDelta) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    for session in sessions {
        let mut ts = session.open;
        while ts < session.close {
            out.push(ts);
            ts += step;
        }
        out.push(session.close);
    }
    out
}

fn decimate(sessions: &[Session], frequency: DailyFrequency) -> Vec<DateTime<Utc>> {
    let step = frequency.multiple().max(1) as usize;
    match frequency {
        DailyFrequency::BusinessDays(_) => sessions.iter().step_by(step).map(|s| s.open).collect(),
        DailyFrequency::Weeks(_) => first_per_group(sessions, |d| {
            let week = d.iso_week();
            (week.year(), week.week())
        })
        .step_by(step)
        .collect(),
        DailyFrequency::Months(_) => first_per_group(sessions, |d| (d.year(), d.month()))
            .step_by(step)
            .collect(),
    }
}

/// Open of the first session in each run of sessions sharing a group key.
fn first_per_group<'a, K, F>(sessions: &'a [Session], key: F) -> impl Iterator<Item = DateTime<Utc>> + 'a
where
    K: PartialEq + 'a,
    F: Fn(NaiveDate) -> K + 'a,
{
    let mut previous: Option<K> = None;
    sessions.iter().filter_map(move |s| {
        let k = key(s.date);
        if previous.as_ref() == Some(&k) {
            None
        } else {
            previous = Some(k);
            Some(s.open)
        }
    })
}
