//! Error types shared across the crate.
//!
//! Each layer owns its own enum (`RequestError` here, `StoreError` in
//! [`crate::store`], `ProviderError` in [`crate::data`], `ConfigError` in
//! [`crate::config`]); [`CacheError`] is what the reconciler hands back.

use chrono::NaiveDate;
use thiserror::Error;

use crate::store::StoreError;

/// Request validation failures. All of these are raised before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("invalid interval '{key}' (valid: {valid})")]
    InvalidInterval { key: String, valid: String },

    #[error("invalid period '{key}' (valid: {valid})")]
    InvalidPeriod { key: String, valid: String },

    #[error("invalid date '{input}': {reason}")]
    InvalidDate { input: String, reason: String },

    #[error("request has no tickers")]
    NoTickers,

    #[error("request needs a period, a start date, or both a start and an end date")]
    MissingRange,

    #[error("start date {start} is after end date {end}")]
    StartAfterEnd { start: NaiveDate, end: NaiveDate },

    #[error("range {start}..{end} is shorter than one '{interval}' interval")]
    RangeTooSmall {
        start: NaiveDate,
        end: NaiveDate,
        interval: String,
    },
}

/// Top-level error returned by [`crate::reconcile::Reconciler`].
///
/// Provider failures are not here: they are recovered per ticker and
/// reported in the reconcile status map instead.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_render_context() {
        let err = RequestError::RangeTooSmall {
            start: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            interval: "5d".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2024-01-02"));
        assert!(msg.contains("'5d'"));
    }

    #[test]
    fn cache_error_wraps_request_error_transparently() {
        let err: CacheError = RequestError::NoTickers.into();
        assert_eq!(err.to_string(), "request has no tickers");
    }
}
