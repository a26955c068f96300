//! Lookback periods (`1d`, `1mo`, `10y`, `ytd`, `max`) and their
//! calendar-aware date arithmetic.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::interval::split_count_unit;
use crate::error::RequestError;

/// Every period key the cache accepts.
pub const SUPPORTED_PERIODS: [&str; 11] = [
    "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Day,
    Month,
    Year,
}

impl PeriodUnit {
    fn suffix(&self) -> &'static str {
        match self {
            PeriodUnit::Day => "d",
            PeriodUnit::Month => "mo",
            PeriodUnit::Year => "y",
        }
    }
}

/// A lookback span.
///
/// `Span` values built through [`Period::from_key`] are restricted to the
/// supported keys; [`Period::from_days`] may produce any count and is only
/// used to describe an explicit date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Period {
    /// All available history.
    Max,
    /// From January 1st of the end date's year.
    Ytd,
    Span { count: u32, unit: PeriodUnit },
}

impl Period {
    pub fn from_key(key: &str) -> Result<Self, RequestError> {
        let invalid = || RequestError::InvalidPeriod {
            key: key.to_string(),
            valid: SUPPORTED_PERIODS.join(", "),
        };

        let key = key.trim();
        if !SUPPORTED_PERIODS.contains(&key) {
            return Err(invalid());
        }
        match key {
            "max" => Ok(Period::Max),
            "ytd" => Ok(Period::Ytd),
            _ => {
                let (count, unit) = split_count_unit(key).ok_or_else(invalid)?;
                let unit = match unit {
                    "d" => PeriodUnit::Day,
                    "mo" => PeriodUnit::Month,
                    "y" => PeriodUnit::Year,
                    _ => return Err(invalid()),
                };
                Ok(Period::Span { count, unit })
            }
        }
    }

    /// Describe a day delta as the coarsest whole unit that fits.
    ///
    /// `>= 365` days reports years, `>= 28` days months, otherwise days.
    pub fn from_days(days: i64) -> Self {
        let days = days.max(0);
        let (count, unit) = if days >= 365 {
            (days / 365, PeriodUnit::Year)
        } else if days >= 28 {
            (days / 28, PeriodUnit::Month)
        } else {
            (days, PeriodUnit::Day)
        };
        Period::Span {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            unit,
        }
    }

    /// `date - self`. Month and year steps clamp to the end of the target
    /// month. `Max` has no start and returns `None`; `Ytd` returns Jan 1.
    pub fn subtract_from(&self, date: NaiveDate) -> Option<NaiveDate> {
        match *self {
            Period::Max => None,
            Period::Ytd => NaiveDate::from_ymd_opt(date.year(), 1, 1),
            Period::Span { count, unit } => match unit {
                PeriodUnit::Day => date.checked_sub_days(Days::new(u64::from(count))),
                PeriodUnit::Month => date.checked_sub_months(Months::new(count)),
                PeriodUnit::Year => date.checked_sub_months(Months::new(count.checked_mul(12)?)),
            },
        }
    }

    /// `date + self`. `Max` and `Ytd` are anchored on the end date and
    /// cannot be projected forward.
    pub fn add_to(&self, date: NaiveDate) -> Option<NaiveDate> {
        match *self {
            Period::Max | Period::Ytd => None,
            Period::Span { count, unit } => match unit {
                PeriodUnit::Day => date.checked_add_days(Days::new(u64::from(count))),
                PeriodUnit::Month => date.checked_add_months(Months::new(count)),
                PeriodUnit::Year => date.checked_add_months(Months::new(count.checked_mul(12)?)),
            },
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Max => f.write_str("max"),
            Period::Ytd => f.write_str("ytd"),
            Period::Span { count, unit } => write!(f, "{count}{}", unit.suffix()),
        }
    }
}

impl FromStr for Period {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s)
    }
}

impl TryFrom<String> for Period {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_key(&value)
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}
