//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over market-data sources (Yahoo chart
//! API, synthetic data) so the reconciler can swap implementations and tests
//! can count calls. Providers know nothing about the cache.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{Interval, OhlcvRow};

/// Rows per ticker returned by one provider call. A ticker may be missing
/// or map to fewer rows than expected.
pub type ProviderBatch = HashMap<String, Vec<OhlcvRow>>;

/// Structured error types for provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("provider error: {0}")]
    Other(String),
}

/// Trait for market-data providers.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch rows for `tickers` at `interval` over the market-local dates
    /// `[start, end]`.
    fn fetch(
        &self,
        tickers: &[String],
        interval: &Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ProviderBatch, ProviderError>;

    /// Whether the provider currently accepts requests (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

impl<P: DataProvider + ?Sized> DataProvider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(
        &self,
        tickers: &[String],
        interval: &Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ProviderBatch, ProviderError> {
        (**self).fetch(tickers, interval, start, end)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

impl<P: DataProvider + ?Sized> DataProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(
        &self,
        tickers: &[String],
        interval: &Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ProviderBatch, ProviderError> {
        (**self).fetch(tickers, interval, start, end)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}
