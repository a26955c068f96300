//! NYSE regular-session calendar.
//!
//! 09:30–16:00 America/New_York, Monday–Friday, minus the exchange's
//! holidays. Holidays are derived from rules rather than a table so any year
//! works; one-off closures are listed explicitly. Early closes end at 13:00.

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;

use super::{hm, MarketCalendar, Session};

/// Unscheduled full-day closures.
const SPECIAL_CLOSURES: &[(i32, u32, u32)] = &[
    (1994, 4, 27), // Nixon funeral
    (2001, 9, 11), // September 11
    (2001, 9, 12),
    (2001, 9, 13),
    (2001, 9, 14),
    (2004, 6, 11), // Reagan funeral
    (2007, 1, 2),  // Ford funeral
    (2012, 10, 29), // Hurricane Sandy
    (2012, 10, 30),
    (2018, 12, 5), // G.H.W. Bush funeral
    (2025, 1, 9),  // Carter funeral
];

#[derive(Debug, Clone, Copy, Default)]
pub struct NyseCalendar;

impl NyseCalendar {
    pub const TIMEZONE: Tz = chrono_tz::America::New_York;

    pub fn new() -> Self {
        Self
    }

    pub const REGULAR_OPEN: NaiveTime = hm(9, 30);
    pub const REGULAR_CLOSE: NaiveTime = hm(16, 0);
    pub const EARLY_CLOSE: NaiveTime = hm(13, 0);

    /// Full-day closures falling in `year`, after weekend observance.
    pub fn holidays(year: i32) -> Vec<NaiveDate> {
        let mut days = Vec::with_capacity(12);

        // New Year's Day: a Sunday holiday moves to Monday; a Saturday one is
        // not observed on the preceding Friday.
        if let Some(jan1) = ymd(year, 1, 1) {
            match jan1.weekday() {
                Weekday::Sat => {}
                Weekday::Sun => days.extend(jan1.succ_opt()),
                _ => days.push(jan1),
            }
        }
        if year >= 1998 {
            days.extend(NaiveDate::from_weekday_of_month_opt(year, 1, Weekday::Mon, 3));
        }
        days.extend(NaiveDate::from_weekday_of_month_opt(year, 2, Weekday::Mon, 3));
        days.extend(easter_sunday(year).and_then(|e| e.checked_sub_days(chrono::Days::new(2))));
        days.extend(last_weekday_of_month(year, 5, Weekday::Mon));
        if year >= 2022 {
            days.extend(ymd(year, 6, 19).map(observed));
        }
        days.extend(ymd(year, 7, 4).map(observed));
        days.extend(NaiveDate::from_weekday_of_month_opt(year, 9, Weekday::Mon, 1));
        days.extend(NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Thu, 4));
        days.extend(ymd(year, 12, 25).map(observed));

        days.extend(
            SPECIAL_CLOSURES
                .iter()
                .filter(|(y, _, _)| *y == year)
                .filter_map(|&(y, m, d)| ymd(y, m, d)),
        );
        days.sort_unstable();
        days.dedup();
        days
    }

    /// Sessions ending at 13:00: July 3rd, the day after Thanksgiving and
    /// Christmas Eve, whenever those are trading days.
    pub fn is_early_close(date: NaiveDate) -> bool {
        let year = date.year();
        let day_after_thanksgiving = NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Thu, 4)
            .and_then(|d| d.succ_opt());
        (date.month() == 7 && date.day() == 3)
            || (date.month() == 12 && date.day() == 24)
            || Some(date) == day_after_thanksgiving
    }
}

impl MarketCalendar for NyseCalendar {
    fn name(&self) -> &str {
        "NYSE"
    }

    fn timezone(&self) -> Tz {
        Self::TIMEZONE
    }

    fn schedule(&self, start: NaiveDate, end: NaiveDate) -> Vec<Session> {
        if start > end {
            return Vec::new();
        }
        let closed: HashSet<NaiveDate> = (start.year()..=end.year())
            .flat_map(Self::holidays)
            .collect();

        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .filter(|d| !closed.contains(d))
            .filter_map(|d| {
                let close = if Self::is_early_close(d) {
                    Self::EARLY_CLOSE
                } else {
                    Self::REGULAR_CLOSE
                };
                Session::from_local(d, Self::REGULAR_OPEN, close, Self::TIMEZONE)
            })
            .collect()
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Saturday holidays are observed on Friday, Sunday holidays on Monday.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date.pred_opt().unwrap_or(date),
        Weekday::Sun => date.succ_opt().unwrap_or(date),
        _ => date,
    }
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        ymd(year + 1, 1, 1)?
    } else {
        ymd(year, month + 1, 1)?
    };
    let last = first_of_next.pred_opt()?;
    let back = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last.checked_sub_days(chrono::Days::new(u64::from(back)))
}

/// Gregorian Easter Sunday (anonymous computus).
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    ymd(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}
