//! Trading calendars and the expected-timestamp index built from them.
//!
//! A [`MarketCalendar`] only answers "which sessions exist between these two
//! dates". Everything interval-specific (decimation, intraday ticks) lives
//! in [`CalendarIndex`].

pub mod index;
pub mod nyse;
pub mod weekday;

pub use index::CalendarIndex;
pub use nyse::NyseCalendar;
pub use weekday::WeekdayCalendar;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// One trading session. `date` is the market-local trading day; `open` and
/// `close` are UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub date: NaiveDate,
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
}

impl Session {
    /// Build a session from market-local open and close times. Returns `None`
    /// when either local time does not exist on that date.
    pub fn from_local(date: NaiveDate, open: NaiveTime, close: NaiveTime, tz: Tz) -> Option<Self> {
        let open = tz.from_local_datetime(&date.and_time(open)).earliest()?;
        let close = tz.from_local_datetime(&date.and_time(close)).earliest()?;
        Some(Self {
            date,
            open: open.with_timezone(&Utc),
            close: close.with_timezone(&Utc),
        })
    }
}

pub trait MarketCalendar: Send + Sync {
    fn name(&self) -> &str;

    /// Timezone the market's trading dates are expressed in.
    fn timezone(&self) -> Tz;

    /// Sessions for every trading day in `[start, end]`, ascending.
    fn schedule(&self, start: NaiveDate, end: NaiveDate) -> Vec<Session>;

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !self.schedule(date, date).is_empty()
    }
}

/// `hh:mm` as a compile-time constant.
pub(crate) const fn hm(hour: u32, minute: u32) -> NaiveTime {
    match NaiveTime::from_hms_opt(hour, minute, 0) {
        Some(time) => time,
        None => panic!("invalid time of day"),
    }
}

/// The market-local calendar date of a UTC instant.
pub fn local_date(ts: DateTime<Utc>, tz: Tz) -> NaiveDate {
    ts.with_timezone(&tz).date_naive()
}

/// Local midnight at the start of `date`, as a UTC instant.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

/// UTC bounds covering every instant whose local date is in `[start, end]`.
/// Both bounds are inclusive.
pub fn local_day_bounds(start: NaiveDate, end: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let lo = local_midnight(start, tz);
    let hi = match end.succ_opt() {
        Some(next) => local_midnight(next, tz) - chrono::TimeDelta::nanoseconds(1),
        None => DateTime::<Utc>::MAX_UTC,
    };
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    #[test]
    fn session_from_local_converts_to_utc() {
        let date = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let s = Session::from_local(
            date,
            NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            New_York,
        )
        .unwrap();
        assert_eq!(s.open, Utc.with_ymd_and_hms(2022, 1, 3, 14, 30, 0).unwrap());
        assert_eq!(s.close, Utc.with_ymd_and_hms(2022, 1, 3, 21, 0, 0).unwrap());
    }

    #[test]
    fn day_bounds_follow_local_midnight() {
        let date = NaiveDate::from_ymd_opt(2022, 7, 1).unwrap();
        let (lo, hi) = local_day_bounds(date, date, New_York);
        assert_eq!(lo, Utc.with_ymd_and_hms(2022, 7, 1, 4, 0, 0).unwrap());
        assert!(hi < Utc.with_ymd_and_hms(2022, 7, 2, 4, 0, 0).unwrap());
        assert_eq!(local_date(hi, New_York), date);
    }
}
