//! Synthetic market data for development and tests.
//!
//! Rows land exactly on the calendar index for the requested interval, so a
//! synthetic fetch always covers every expected timestamp. The walk is
//! seeded from the ticker name: the same (ticker, range, interval) always
//! produces the same rows.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use super::provider::{DataProvider, ProviderBatch, ProviderError};
use crate::calendar::{CalendarIndex, MarketCalendar};
use crate::domain::{Interval, OhlcvRow};

pub struct SyntheticProvider {
    calendar: Arc<dyn MarketCalendar>,
}

impl SyntheticProvider {
    pub fn new(calendar: Arc<dyn MarketCalendar>) -> Self {
        Self { calendar }
    }

    pub fn generate(&self, ticker: &str, interval: &Interval, start: NaiveDate, end: NaiveDate) -> Vec<OhlcvRow> {
        let index = CalendarIndex::compute(self.calendar.as_ref(), start, end, interval);

        let seed: [u8; 32] = *blake3::hash(ticker.as_bytes()).as_bytes();
        let mut rng = StdRng::from_seed(seed);
        // Intraday steps move less than daily ones.
        let spread = if interval.is_intraday() { 0.002 } else { 0.03 };

        let mut price = 100.0_f64;
        index
            .timestamps()
            .iter()
            .map(|&timestamp| {
                let step: f64 = rng.gen_range(-spread..spread);
                let open = price;
                let close = price * (1.0 + step);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..spread / 3.0));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..spread / 3.0));
                let volume = rng.gen_range(500_000..5_000_000u64);
                price = close;
                OhlcvRow {
                    timestamp,
                    open: Some(open),
                    high: Some(high),
                    low: Some(low),
                    close: Some(close),
                    adj_close: Some(close),
                    volume: Some(volume),
                }
            })
            .collect()
    }
}

impl DataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(
        &self,
        tickers: &[String],
        interval: &Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ProviderBatch, ProviderError> {
        Ok(tickers
            .iter()
            .map(|t| (t.clone(), self.generate(t, interval, start, end)))
            .collect())
    }
}
