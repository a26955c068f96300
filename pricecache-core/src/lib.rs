//! PriceCache Core: a local cache of market price history.
//!
//! This crate holds everything between a caller asking for prices and the
//! bytes on disk:
//! - Domain types (intervals, periods, OHLCV rows, canonical series)
//! - Request normalization into a validated, fully-resolved form
//! - Trading calendars and the expected-timestamp index they produce
//! - Series stores (Parquet on disk, in-memory for tests)
//! - Data providers with batching, rate limiting and a circuit breaker
//! - The reconciler that diffs, fetches the gaps, and merges

pub mod calendar;
pub mod clock;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod reconcile;
pub mod request;
pub mod store;

pub use error::{CacheError, RequestError};
pub use reconcile::{ReconcileOptions, ReconcileReport, Reconciler, TickerStatus};
pub use request::{normalize, RawRequest, Request};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything a background worker might hold is
    /// Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Interval>();
        require_sync::<domain::Interval>();
        require_send::<domain::Period>();
        require_sync::<domain::Period>();
        require_send::<domain::OhlcvRow>();
        require_sync::<domain::OhlcvRow>();
        require_send::<domain::CachedSeries>();
        require_sync::<domain::CachedSeries>();

        // Requests and results
        require_send::<Request>();
        require_sync::<Request>();
        require_send::<ReconcileReport>();
        require_sync::<ReconcileReport>();
        require_send::<CacheError>();
        require_sync::<CacheError>();

        // Calendars
        require_send::<calendar::NyseCalendar>();
        require_sync::<calendar::NyseCalendar>();
        require_send::<calendar::WeekdayCalendar>();
        require_sync::<calendar::WeekdayCalendar>();
        require_send::<calendar::CalendarIndex>();
        require_sync::<calendar::CalendarIndex>();

        // Stores and providers
        require_send::<store::MemoryBackend>();
        require_sync::<store::MemoryBackend>();
        require_send::<store::ParquetBackend>();
        require_sync::<store::ParquetBackend>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::SyntheticProvider>();
        require_sync::<data::SyntheticProvider>();
        require_send::<data::ThrottledProvider<data::SyntheticProvider>>();
        require_sync::<data::ThrottledProvider<data::SyntheticProvider>>();

        // The reconciler itself
        require_send::<Reconciler>();
        require_sync::<Reconciler>();
    }

    #[test]
    fn store_handle_is_released_on_drop() {
        use store::{SeriesStore, StoreBackend};

        let backend = store::MemoryBackend::new();
        {
            let handle: Box<dyn SeriesStore + '_> = backend.open().unwrap();
            assert_eq!(backend.open_handles(), 1);
            assert!(handle.keys("").unwrap().is_empty());
        }
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(backend.total_opens(), 1);
    }
}
