//! What a reconcile call hands back.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::OhlcvRow;
use crate::request::Request;

/// Outcome for one ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickerStatus {
    /// Served from the store without a provider call.
    Cached,
    /// Dates `[start, end]` were fetched and merged. `rows` had data,
    /// `null_rows` were expected but not returned.
    Fetched {
        start: NaiveDate,
        end: NaiveDate,
        rows: usize,
        null_rows: usize,
    },
    /// The provider failed or returned nothing usable. The series holds
    /// whatever was already stored.
    FetchFailed { reason: String },
    /// The ticker cannot be used as a store key.
    Invalid { reason: String },
    /// The range contains no trading sessions.
    NoSessions,
}

impl TickerStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, TickerStatus::FetchFailed { .. } | TickerStatus::Invalid { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub request: Request,
    /// Rows per ticker, restricted to the requested window, null rows removed.
    pub series: BTreeMap<String, Vec<OhlcvRow>>,
    pub status: BTreeMap<String, TickerStatus>,
}

impl ReconcileReport {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            series: BTreeMap::new(),
            status: BTreeMap::new(),
        }
    }

    pub(crate) fn record(&mut self, ticker: &str, rows: Vec<OhlcvRow>, status: TickerStatus) {
        self.series.insert(ticker.to_string(), rows);
        self.status.insert(ticker.to_string(), status);
    }

    pub fn rows(&self, ticker: &str) -> &[OhlcvRow] {
        self.series.get(ticker).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tickers that needed a provider call.
    pub fn fetched(&self) -> usize {
        self.status
            .values()
            .filter(|s| matches!(s, TickerStatus::Fetched { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &TickerStatus)> {
        self.status
            .iter()
            .filter(|(_, s)| s.is_failure())
            .map(|(t, s)| (t.as_str(), s))
    }
}
