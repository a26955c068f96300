//! Request normalization.
//!
//! A [`RawRequest`] is whatever the caller had at hand: one ticker or many,
//! dates as values or strings, a period key or a raw day delta. Every input
//! shape is resolved once here, then [`normalize`] runs an ordered pipeline
//! of small steps and returns an immutable [`Request`] whose range is fully
//! concrete.

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use serde::Serialize;

use crate::domain::{Interval, Period};
use crate::error::RequestError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ── Input shapes ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TickerInput {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for TickerInput {
    fn from(value: &str) -> Self {
        TickerInput::One(value.to_string())
    }
}

impl From<String> for TickerInput {
    fn from(value: String) -> Self {
        TickerInput::One(value)
    }
}

impl From<Vec<String>> for TickerInput {
    fn from(value: Vec<String>) -> Self {
        TickerInput::Many(value)
    }
}

impl From<Vec<&str>> for TickerInput {
    fn from(value: Vec<&str>) -> Self {
        TickerInput::Many(value.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for TickerInput {
    fn from(value: &[&str]) -> Self {
        TickerInput::Many(value.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DateInput {
    Date(NaiveDate),
    /// `YYYY-MM-DD`.
    Text(String),
}

impl DateInput {
    pub fn resolve(&self) -> Result<NaiveDate, RequestError> {
        match self {
            DateInput::Date(date) => Ok(*date),
            DateInput::Text(text) => NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).map_err(|e| {
                RequestError::InvalidDate {
                    input: text.clone(),
                    reason: e.to_string(),
                }
            }),
        }
    }
}

impl From<NaiveDate> for DateInput {
    fn from(value: NaiveDate) -> Self {
        DateInput::Date(value)
    }
}

impl From<&str> for DateInput {
    fn from(value: &str) -> Self {
        DateInput::Text(value.to_string())
    }
}

impl From<String> for DateInput {
    fn from(value: String) -> Self {
        DateInput::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeriodInput {
    Key(String),
    Period(Period),
    /// A raw span, described as the coarsest whole unit that fits.
    Delta(TimeDelta),
}

impl PeriodInput {
    pub fn resolve(&self) -> Result<Period, RequestError> {
        match self {
            PeriodInput::Key(key) => Period::from_key(key),
            PeriodInput::Period(period) => Ok(*period),
            PeriodInput::Delta(delta) => Ok(Period::from_days(delta.num_days())),
        }
    }
}

impl From<&str> for PeriodInput {
    fn from(value: &str) -> Self {
        PeriodInput::Key(value.to_string())
    }
}

impl From<String> for PeriodInput {
    fn from(value: String) -> Self {
        PeriodInput::Key(value)
    }
}

impl From<Period> for PeriodInput {
    fn from(value: Period) -> Self {
        PeriodInput::Period(value)
    }
}

impl From<TimeDelta> for PeriodInput {
    fn from(value: TimeDelta) -> Self {
        PeriodInput::Delta(value)
    }
}

/// An unvalidated request. The interval defaults to `1d`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub tickers: TickerInput,
    pub interval: String,
    pub period: Option<PeriodInput>,
    pub start: Option<DateInput>,
    pub end: Option<DateInput>,
}

impl RawRequest {
    pub fn new(tickers: impl Into<TickerInput>) -> Self {
        Self {
            tickers: tickers.into(),
            interval: "1d".to_string(),
            period: None,
            start: None,
            end: None,
        }
    }

    pub fn interval(mut self, key: impl Into<String>) -> Self {
        self.interval = key.into();
        self
    }

    pub fn period(mut self, period: impl Into<PeriodInput>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn start(mut self, start: impl Into<DateInput>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn end(mut self, end: impl Into<DateInput>) -> Self {
        self.end = Some(end.into());
        self
    }
}

// ── Normalized request ──────────────────────────────────────────────

/// A validated request.
///
/// `end_date >= start_date + interval.duration` holds unless the period is
/// `max`, in which case `start_date` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    tickers: Vec<String>,
    interval: Interval,
    start_date: Option<NaiveDate>,
    end_date: NaiveDate,
    period: Option<Period>,
}

impl Request {
    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn interval(&self) -> &Interval {
        &self.interval
    }

    /// `None` only for `period = max`.
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn period(&self) -> Option<Period> {
        self.period
    }
}

/// Turn a raw request into a validated [`Request`]. `today` is the current
/// date in the market's timezone.
pub fn normalize(raw: &RawRequest, today: NaiveDate) -> Result<Request, RequestError> {
    let tickers = wrap_tickers(&raw.tickers)?;
    let interval = Interval::from_key(&raw.interval)?;
    let period = raw.period.as_ref().map(PeriodInput::resolve).transpose()?;
    let start = raw.start.as_ref().map(DateInput::resolve).transpose()?;
    let end = raw.end.as_ref().map(DateInput::resolve).transpose()?;

    let range = match period {
        Some(Period::Max) => resolve_max(today),
        Some(Period::Ytd) => resolve_ytd(today)?,
        Some(period) => match (start, end) {
            (None, end) => resolve_from_end(period, end.unwrap_or(today))?,
            (Some(start), None) => resolve_from_start(period, start)?,
            (Some(start), Some(end)) => ResolvedRange {
                start: Some(start),
                end,
                period,
            },
        },
        None => derive_reporting_period(resolve_explicit(start, end, today)?),
    };

    check_min_span(&range, &interval)?;

    Ok(Request {
        tickers,
        interval,
        start_date: range.start,
        end_date: range.end,
        period: Some(range.period),
    })
}

// ── Pipeline steps ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolvedRange {
    start: Option<NaiveDate>,
    end: NaiveDate,
    period: Period,
}

/// Trim, upper-case and dedupe tickers, keeping first occurrence order.
fn wrap_tickers(input: &TickerInput) -> Result<Vec<String>, RequestError> {
    let raw: Vec<&str> = match input {
        TickerInput::One(t) => vec![t.as_str()],
        TickerInput::Many(ts) => ts.iter().map(String::as_str).collect(),
    };
    let mut tickers: Vec<String> = Vec::with_capacity(raw.len());
    for t in raw {
        let t = t.trim().to_uppercase();
        if !t.is_empty() && !tickers.contains(&t) {
            tickers.push(t);
        }
    }
    if tickers.is_empty() {
        return Err(RequestError::NoTickers);
    }
    Ok(tickers)
}

fn resolve_max(today: NaiveDate) -> ResolvedRange {
    ResolvedRange {
        start: None,
        end: today,
        period: Period::Max,
    }
}

fn resolve_ytd(today: NaiveDate) -> Result<ResolvedRange, RequestError> {
    let start = Period::Ytd
        .subtract_from(today)
        .ok_or_else(|| out_of_range(today))?;
    Ok(ResolvedRange {
        start: Some(start),
        end: today,
        period: Period::Ytd,
    })
}

fn resolve_from_end(period: Period, end: NaiveDate) -> Result<ResolvedRange, RequestError> {
    let start = period.subtract_from(end).ok_or_else(|| out_of_range(end))?;
    Ok(ResolvedRange {
        start: Some(start),
        end,
        period,
    })
}

fn resolve_from_start(period: Period, start: NaiveDate) -> Result<ResolvedRange, RequestError> {
    let end = period.add_to(start).ok_or_else(|| out_of_range(start))?;
    Ok(ResolvedRange {
        start: Some(start),
        end,
        period,
    })
}

/// No period: a start is required, the end defaults to today.
fn resolve_explicit(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), RequestError> {
    match (start, end) {
        (Some(start), Some(end)) => Ok((start, end)),
        (Some(start), None) => Ok((start, today)),
        (None, _) => Err(RequestError::MissingRange),
    }
}

fn derive_reporting_period((start, end): (NaiveDate, NaiveDate)) -> ResolvedRange {
    ResolvedRange {
        start: Some(start),
        end,
        period: Period::from_days((end - start).num_days()),
    }
}

/// The range must cover at least one full interval.
fn check_min_span(range: &ResolvedRange, interval: &Interval) -> Result<(), RequestError> {
    let Some(start) = range.start else {
        return Ok(());
    };
    let end = range.end;
    if start > end {
        return Err(RequestError::StartAfterEnd { start, end });
    }
    let start_dt = start.and_time(NaiveTime::MIN);
    let end_dt = end.and_time(NaiveTime::MIN);
    if start_dt + interval.duration() > end_dt {
        return Err(RequestError::RangeTooSmall {
            start,
            end,
            interval: interval.key().to_string(),
        });
    }
    Ok(())
}

fn out_of_range(date: NaiveDate) -> RequestError {
    RequestError::InvalidDate {
        input: date.to_string(),
        reason: "period arithmetic leaves the supported date range".to_string(),
    }
}
