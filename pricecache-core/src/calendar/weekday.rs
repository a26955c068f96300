//! A holiday-free calendar: every Monday–Friday is a session.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;

use super::{hm, MarketCalendar, Session};

/// Close of a session that runs the whole local day: the last minute bar.
const LAST_MINUTE: NaiveTime = hm(23, 59);

#[derive(Debug, Clone, Copy)]
pub struct WeekdayCalendar {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl WeekdayCalendar {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self { tz, open, close }
    }

    /// Weekdays around the clock in UTC.
    pub fn utc() -> Self {
        Self::new(chrono_tz::UTC, NaiveTime::MIN, LAST_MINUTE)
    }
}

impl Default for WeekdayCalendar {
    /// New York regular hours without holidays.
    fn default() -> Self {
        Self::new(
            chrono_tz::America::New_York,
            hm(9, 30),
            hm(16, 0),
        )
    }
}

impl MarketCalendar for WeekdayCalendar {
    fn name(&self) -> &str {
        "weekdays"
    }

    fn timezone(&self) -> Tz {
        self.tz
    }

    fn schedule(&self, start: NaiveDate, end: NaiveDate) -> Vec<Session> {
        if start > end {
            return Vec::new();
        }
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .filter_map(|d| {
                // A close at or before the open means the session runs to the
                // end of the local day, never into the next one.
                let close = if self.close <= self.open { LAST_MINUTE } else { self.close };
                Session::from_local(d, self.open, close, self.tz)
            })
            .collect()
    }
}
