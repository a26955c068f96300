//! Request batching on the provider side.
//!
//! Providers cap how many tickers one request may carry and how often
//! requests may be sent. [`ThrottledProvider`] enforces both around any
//! inner provider; when a whole batch fails, its tickers are retried one by
//! one so a single bad symbol cannot sink its neighbours.

use chrono::NaiveDate;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::{DataProvider, ProviderBatch, ProviderError};
use super::rate_limit::RateLimiter;
use crate::domain::Interval;

/// Run `fetch` over `tickers` in chunks of at most `size`, retrying the
/// members of a failed chunk individually.
///
/// Fails only when no ticker produced a result; the last error is returned.
pub fn for_each_batch<F>(tickers: &[String], size: usize, mut fetch: F) -> Result<ProviderBatch, ProviderError>
where
    F: FnMut(&[String]) -> Result<ProviderBatch, ProviderError>,
{
    let mut out = ProviderBatch::new();
    let mut last_error = None;

    for chunk in tickers.chunks(size.max(1)) {
        match fetch(chunk) {
            Ok(batch) => out.extend(batch),
            Err(e) if chunk.len() > 1 => {
                warn!(error = %e, size = chunk.len(), "batch failed, retrying tickers individually");
                for ticker in chunk {
                    match fetch(std::slice::from_ref(ticker)) {
                        Ok(batch) => out.extend(batch),
                        Err(e) => {
                            warn!(ticker = %ticker, error = %e, "ticker fetch failed");
                            last_error = Some(e);
                        }
                    }
                }
            }
            Err(e) => {
                warn!(ticker = %chunk[0], error = %e, "ticker fetch failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if out.is_empty() => Err(e),
        _ => Ok(out),
    }
}

/// Wraps a provider with a rate limiter and a per-request ticker cap.
pub struct ThrottledProvider<P> {
    inner: P,
    limiter: RateLimiter,
    max_tickers_per_request: usize,
}

impl<P: DataProvider> ThrottledProvider<P> {
    pub fn new(inner: P, poll_frequency: Duration, max_tickers_per_request: usize) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(poll_frequency),
            max_tickers_per_request: max_tickers_per_request.max(1),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: DataProvider> DataProvider for ThrottledProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fetch(
        &self,
        tickers: &[String],
        interval: &Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ProviderBatch, ProviderError> {
        for_each_batch(tickers, self.max_tickers_per_request, |chunk| {
            let waited = self.limiter.wait();
            debug!(tickers = chunk.len(), waited_ms = waited.as_millis() as u64, "provider request");
            self.inner.fetch(chunk, interval, start, end)
        })
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
