//! Sampling intervals and the base granularity each one is stored under.
//!
//! An [`Interval`] carries everything downstream code needs to know about a
//! sampling key: its duration, how its timestamps are laid out on the
//! trading calendar, and which base store it is served from. Nothing past
//! this module should ever match on interval strings.

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RequestError;

/// Every interval key the cache accepts.
pub const SUPPORTED_INTERVALS: [&str; 13] = [
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];

/// Coarsest unit a cache key is stored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseGranularity {
    Minute,
    Daily,
}

impl BaseGranularity {
    pub const ALL: [BaseGranularity; 2] = [BaseGranularity::Minute, BaseGranularity::Daily];

    /// Name used in store keys (`/minute/…`, `/daily/…`).
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseGranularity::Minute => "minute",
            BaseGranularity::Daily => "daily",
        }
    }

    /// The provider interval fetched for this granularity (`1m` or `1d`).
    pub fn interval(&self) -> Interval {
        match self {
            BaseGranularity::Minute => Interval::minutes("1m", 1),
            BaseGranularity::Daily => Interval::days("1d", 1),
        }
    }
}

impl fmt::Display for BaseGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(BaseGranularity::Minute),
            "daily" => Ok(BaseGranularity::Daily),
            other => Err(format!("unknown base granularity '{other}'")),
        }
    }
}

/// How an interval's timestamps are picked from the session list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DailyFrequency {
    /// Every n-th trading session.
    BusinessDays(u32),
    /// First session of every n-th calendar week.
    Weeks(u32),
    /// First session of every n-th calendar month.
    Months(u32),
}

impl DailyFrequency {
    pub fn multiple(&self) -> u32 {
        match *self {
            DailyFrequency::BusinessDays(n) | DailyFrequency::Weeks(n) | DailyFrequency::Months(n) => n,
        }
    }
}

impl fmt::Display for DailyFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DailyFrequency::BusinessDays(1) => f.write_str("B"),
            DailyFrequency::BusinessDays(n) => write!(f, "{n}B"),
            DailyFrequency::Weeks(n) => write!(f, "{n}W"),
            DailyFrequency::Months(n) => write!(f, "{n}M"),
        }
    }
}

/// A validated sampling interval.
///
/// Immutable once built; the only constructor that accepts arbitrary input
/// is [`Interval::from_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Interval {
    key: &'static str,
    duration: TimeDelta,
    daily_frequency: DailyFrequency,
    intraday_frequency: Option<TimeDelta>,
}

impl Interval {
    /// Parse an interval key such as `"5m"`, `"1d"` or `"1mo"`.
    pub fn from_key(key: &str) -> Result<Self, RequestError> {
        let invalid = || RequestError::InvalidInterval {
            key: key.to_string(),
            valid: SUPPORTED_INTERVALS.join(", "),
        };

        let key = SUPPORTED_INTERVALS
            .iter()
            .copied()
            .find(|k| *k == key.trim())
            .ok_or_else(invalid)?;
        let (count, unit) = split_count_unit(key).ok_or_else(invalid)?;

        match unit {
            "m" => Ok(Self::minutes(key, count)),
            "h" => Ok(Self::minutes(key, count * 60)),
            "d" => Ok(Self::days(key, count)),
            "wk" => Ok(Self {
                key,
                duration: TimeDelta::days(7 * i64::from(count)),
                daily_frequency: DailyFrequency::Weeks(count),
                intraday_frequency: None,
            }),
            "mo" => Ok(Self {
                key,
                duration: TimeDelta::days(30 * i64::from(count)),
                daily_frequency: DailyFrequency::Months(count),
                intraday_frequency: None,
            }),
            _ => Err(invalid()),
        }
    }

    fn minutes(key: &'static str, minutes: u32) -> Self {
        let step = TimeDelta::minutes(i64::from(minutes));
        Self {
            key,
            duration: step,
            daily_frequency: DailyFrequency::BusinessDays(1),
            intraday_frequency: Some(step),
        }
    }

    fn days(key: &'static str, days: u32) -> Self {
        Self {
            key,
            duration: TimeDelta::days(i64::from(days)),
            daily_frequency: DailyFrequency::BusinessDays(days),
            intraday_frequency: None,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn duration(&self) -> TimeDelta {
        self.duration
    }

    pub fn daily_frequency(&self) -> DailyFrequency {
        self.daily_frequency
    }

    /// Step between intraday ticks; `None` for daily-or-coarser intervals.
    pub fn intraday_frequency(&self) -> Option<TimeDelta> {
        self.intraday_frequency
    }

    pub fn is_intraday(&self) -> bool {
        self.intraday_frequency.is_some()
    }

    pub fn base(&self) -> BaseGranularity {
        if self.is_intraday() {
            BaseGranularity::Minute
        } else {
            BaseGranularity::Daily
        }
    }

    /// True when this interval is exactly its base store's fetch interval.
    pub fn is_base(&self) -> bool {
        *self == self.base().interval()
    }

    /// Two intervals are calendar-compatible when they share a base
    /// granularity and one duration is an integer multiple of the other.
    pub fn is_calendar_compatible(&self, other: &Interval) -> bool {
        if self.base() != other.base() {
            return false;
        }
        let (a, b) = match self.base() {
            BaseGranularity::Minute => (self.duration.num_minutes(), other.duration.num_minutes()),
            BaseGranularity::Daily => (self.duration.num_days(), other.duration.num_days()),
        };
        a > 0 && b > 0 && (a % b == 0 || b % a == 0)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key)
    }
}

impl FromStr for Interval {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s)
    }
}

impl TryFrom<String> for Interval {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_key(&value)
    }
}

// Hand-written so `Interval` stays `DeserializeOwned`.
impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        Self::from_key(&key).map_err(serde::de::Error::custom)
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.key.to_string()
    }
}

/// Split `"30m"` into `(30, "m")`, `"10y"` into `(10, "y")`.
pub(crate) fn split_count_unit(key: &str) -> Option<(u32, &str)> {
    let key = key.trim();
    let digits = key.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits == key.len() {
        return None;
    }
    let (count, unit) = key.split_at(digits);
    let count: u32 = count.parse().ok()?;
    if count == 0 {
        return None;
    }
    Some((count, unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_supported_key_parses() {
        for key in SUPPORTED_INTERVALS {
            let interval = Interval::from_key(key).unwrap();
            assert_eq!(interval.key(), key);
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        for key in ["", "3m", "1y", "1s", "m", "0d", "abc"] {
            let err = Interval::from_key(key).unwrap_err();
            assert!(matches!(err, RequestError::InvalidInterval { .. }), "{key}");
        }
    }

    #[test]
    fn intraday_frequency_only_for_sub_daily() {
        let five = Interval::from_key("5m").unwrap();
        assert_eq!(five.intraday_frequency(), Some(TimeDelta::minutes(5)));
        assert_eq!(five.base(), BaseGranularity::Minute);

        let hour = Interval::from_key("1h").unwrap();
        assert_eq!(hour.duration(), TimeDelta::minutes(60));

        let week = Interval::from_key("1wk").unwrap();
        assert_eq!(week.intraday_frequency(), None);
        assert_eq!(week.daily_frequency(), DailyFrequency::Weeks(1));
        assert_eq!(week.base(), BaseGranularity::Daily);
    }

    #[test]
    fn durations_match_key() {
        assert_eq!(Interval::from_key("90m").unwrap().duration(), TimeDelta::minutes(90));
        assert_eq!(Interval::from_key("5d").unwrap().duration(), TimeDelta::days(5));
        assert_eq!(Interval::from_key("3mo").unwrap().duration(), TimeDelta::days(90));
    }

    #[test]
    fn base_interval_selection() {
        assert_eq!(Interval::from_key("15m").unwrap().base().interval().key(), "1m");
        assert_eq!(Interval::from_key("5d").unwrap().base().interval().key(), "1d");
        assert!(Interval::from_key("1m").unwrap().is_base());
        assert!(!Interval::from_key("60m").unwrap().is_base());
    }

    #[test]
    fn calendar_compatibility() {
        let m1 = Interval::from_key("1m").unwrap();
        let m15 = Interval::from_key("15m").unwrap();
        let m90 = Interval::from_key("90m").unwrap();
        let d1 = Interval::from_key("1d").unwrap();
        let d5 = Interval::from_key("5d").unwrap();

        assert!(m15.is_calendar_compatible(&m1));
        assert!(m1.is_calendar_compatible(&m90));
        assert!(!m15.is_calendar_compatible(&Interval::from_key("2m").unwrap()));
        assert!(d5.is_calendar_compatible(&d1));
        assert!(!d1.is_calendar_compatible(&m1));
    }

    #[test]
    fn daily_frequency_strings() {
        assert_eq!(Interval::from_key("1d").unwrap().daily_frequency().to_string(), "B");
        assert_eq!(Interval::from_key("5d").unwrap().daily_frequency().to_string(), "5B");
        assert_eq!(Interval::from_key("3mo").unwrap().daily_frequency().to_string(), "3M");
    }

    #[test]
    fn serde_uses_key() {
        let interval = Interval::from_key("30m").unwrap();
        let json = serde_json::to_string(&interval).unwrap();
        assert_eq!(json, "\"30m\"");
        let back: Interval = serde_json::from_str(&json).unwrap();
        assert_eq!(back, interval);
        assert!(serde_json::from_str::<Interval>("\"7m\"").is_err());
    }

    #[test]
    fn deserializes_from_owned_buffer() {
        #[derive(Deserialize)]
        struct Entry {
            interval: Interval,
        }

        fn parse<T: serde::de::DeserializeOwned>(text: String) -> T {
            serde_json::from_str(&text).unwrap()
        }

        let entry: Entry = parse(String::from(r#"{"interval":"1wk"}"#));
        assert_eq!(entry.interval, Interval::from_key("1wk").unwrap());
        let table: toml::Value = toml::from_str("interval = \"5m\"").unwrap();
        let entry: Entry = table.try_into().unwrap();
        assert_eq!(entry.interval.key(), "5m");
    }
}
