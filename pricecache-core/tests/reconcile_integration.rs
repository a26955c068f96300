//! End-to-end reconcile scenarios against synthetic data.
//!
//! The clock is pinned to 2022-08-04 12:00 UTC (before that day's NYSE open)
//! so every calendar computation is reproducible.

use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::{Arc, Mutex};

use pricecache_core::calendar::{MarketCalendar, NyseCalendar};
use pricecache_core::clock::FixedClock;
use pricecache_core::data::{DataProvider, ProviderBatch, ProviderError, SyntheticProvider};
use pricecache_core::domain::{BaseGranularity, Interval, OhlcvRow};
use pricecache_core::store::{MemoryBackend, ParquetBackend, StoreBackend, StoreError, StoreKey};
use pricecache_core::{CacheError, RawRequest, Reconciler, TickerStatus};

// ── Helpers ──────────────────────────────────────────────────────────

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

type CallLog = Arc<Mutex<Vec<(Vec<String>, NaiveDate, NaiveDate)>>>;

/// Synthetic data that records every call it receives.
struct Recording {
    inner: SyntheticProvider,
    calls: CallLog,
    fail: bool,
}

impl DataProvider for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    fn fetch(
        &self,
        tickers: &[String],
        interval: &Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ProviderBatch, ProviderError> {
        self.calls.lock().unwrap().push((tickers.to_vec(), start, end));
        if self.fail {
            return Err(ProviderError::NetworkUnreachable("offline".into()));
        }
        self.inner.fetch(tickers, interval, start, end)
    }
}

fn calendar() -> Arc<dyn MarketCalendar> {
    Arc::new(NyseCalendar::new())
}

fn recording(fail: bool) -> (Recording, CallLog) {
    let calls: CallLog = Arc::default();
    let provider = Recording {
        inner: SyntheticProvider::new(calendar()),
        calls: calls.clone(),
        fail,
    };
    (provider, calls)
}

fn reconciler(store: impl StoreBackend + 'static, provider: Recording) -> Reconciler {
    Reconciler::new(calendar(), store, provider)
        .with_clock(FixedClock(Utc.with_ymd_and_hms(2022, 8, 4, 12, 0, 0).unwrap()))
}

fn call_count(calls: &CallLog) -> usize {
    calls.lock().unwrap().len()
}

// ── Cache behaviour ──────────────────────────────────────────────────

#[test]
fn repeated_request_is_served_without_provider() {
    let (provider, calls) = recording(false);
    let r = reconciler(MemoryBackend::new(), provider);
    let year = RawRequest::new("FAKE").period("1y").end("2022-08-03");

    let first = r.fetch(&year).unwrap();
    assert_eq!(call_count(&calls), 1);
    let rows = first.rows("FAKE");
    assert!(rows.len() >= 250 && rows.len() <= 253, "got {} rows", rows.len());

    let second = r.fetch(&year).unwrap();
    assert_eq!(call_count(&calls), 1);
    assert_eq!(second.status["FAKE"], TickerStatus::Cached);
    assert_eq!(second.rows("FAKE"), rows);

    let month = r.fetch(&RawRequest::new("FAKE").period("1mo").end("2022-08-03")).unwrap();
    assert_eq!(call_count(&calls), 1);
    let subset = month.rows("FAKE");
    assert!(!subset.is_empty() && subset.len() < rows.len());
    assert!(subset.iter().all(|row| rows.contains(row)));
}

#[test]
fn only_the_gap_is_fetched() {
    let (provider, calls) = recording(false);
    let r = reconciler(MemoryBackend::new(), provider);

    r.fetch(&RawRequest::new("FAKE").start("2022-06-01").end("2022-06-14")).unwrap();
    let report = r.fetch(&RawRequest::new("FAKE").start("2022-06-01").end("2022-06-22")).unwrap();

    let log = calls.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].1, d(2022, 6, 1));
    assert_eq!(log[0].2, d(2022, 6, 14));
    // Juneteenth is observed on Monday 2022-06-20.
    assert_eq!(log[1].1, d(2022, 6, 15));
    assert_eq!(log[1].2, d(2022, 6, 22));
    assert_eq!(report.rows("FAKE").len(), 15);
    assert!(matches!(
        report.status["FAKE"],
        TickerStatus::Fetched { rows: 5, null_rows: 0, .. }
    ));
}

#[test]
fn holiday_weekend_returns_empty_series() {
    let (provider, calls) = recording(false);
    let r = reconciler(MemoryBackend::new(), provider);
    // Christmas 2021 fell on a Saturday and was observed on Friday the 24th.
    let report = r.fetch(&RawRequest::new("FAKE").start("2021-12-24").end("2021-12-26")).unwrap();
    assert_eq!(report.status["FAKE"], TickerStatus::NoSessions);
    assert!(report.rows("FAKE").is_empty());
    assert_eq!(call_count(&calls), 0);
}

#[test]
fn all_history_starts_at_configured_date() {
    let (provider, _) = recording(false);
    let r = reconciler(MemoryBackend::new(), provider).with_max_history_start(d(2022, 7, 1));
    let report = r.fetch(&RawRequest::new("FAKE").period("max")).unwrap();
    // 20 July sessions plus Aug 1-3; Aug 4 has not opened yet.
    assert_eq!(report.rows("FAKE").len(), 23);
}

#[test]
fn intraday_request_is_resampled_from_minutes() {
    let (provider, _) = recording(false);
    let backend = MemoryBackend::new();
    let r = reconciler(backend.clone(), provider);
    let report = r
        .fetch(&RawRequest::new("FAKE").interval("5m").start("2022-08-01").end("2022-08-02"))
        .unwrap();
    // 9:30 through 16:00 inclusive, every five minutes, two sessions.
    assert_eq!(report.rows("FAKE").len(), 2 * 79);

    let handle = backend.open().unwrap();
    let minute = StoreKey::new(BaseGranularity::Minute, "FAKE").unwrap();
    assert_eq!(handle.get_all(&minute).unwrap().unwrap().len(), 2 * 391);
}

// ── Failure handling ─────────────────────────────────────────────────

#[test]
fn provider_failure_stores_nothing() {
    let (provider, calls) = recording(true);
    let backend = MemoryBackend::new();
    let r = reconciler(backend.clone(), provider);
    let report = r.fetch(&RawRequest::new(vec!["AAA", "BBB"]).start("2022-08-01").end("2022-08-03")).unwrap();

    assert_eq!(call_count(&calls), 1);
    assert_eq!(report.failures().count(), 2);
    assert!(report.rows("AAA").is_empty());
    assert!(r.keys("").unwrap().is_empty());
    assert_eq!(backend.open_handles(), 0);
}

#[test]
fn invalid_request_never_opens_store() {
    let (provider, calls) = recording(false);
    let backend = MemoryBackend::new();
    let r = reconciler(backend.clone(), provider);
    let err = r.fetch(&RawRequest::new("FAKE").interval("7d").period("1y")).unwrap_err();
    assert!(matches!(err, CacheError::Request(_)));
    assert_eq!(backend.total_opens(), 0);
    assert_eq!(call_count(&calls), 0);
}

#[test]
fn corrupt_series_fails_call_and_releases_handle() {
    let (provider, _) = recording(false);
    let backend = MemoryBackend::new();
    let key = StoreKey::new(BaseGranularity::Daily, "FAKE").unwrap();
    let ts = Utc.with_ymd_and_hms(2022, 8, 1, 13, 30, 0).unwrap();
    backend
        .insert_raw(key, vec![OhlcvRow::null(ts), OhlcvRow::null(ts)])
        .unwrap();

    let r = reconciler(backend.clone(), provider);
    let raw = RawRequest::new("FAKE").start("2022-08-01").end("2022-08-03");
    let err = r.fetch(&raw).unwrap_err();
    assert!(matches!(err, CacheError::Store(StoreError::Corruption { .. })));
    assert_eq!(backend.open_handles(), 0);

    assert_eq!(r.clean().unwrap().total_removed(), 1);
    assert!(r.fetch(&raw).is_ok());
}

// ── Parquet persistence ──────────────────────────────────────────────

#[test]
fn parquet_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let raw = RawRequest::new(vec!["SPY", "QQQ"]).start("2022-07-01").end("2022-07-29");

    let (provider, calls) = recording(false);
    let first = reconciler(ParquetBackend::new(dir.path()), provider).fetch(&raw).unwrap();
    assert_eq!(call_count(&calls), 1);
    assert_eq!(first.rows("SPY").len(), 20);
    assert!(dir.path().join("daily").join("SPY.parquet").exists());

    let (provider, calls) = recording(false);
    let r = reconciler(ParquetBackend::new(dir.path()), provider);
    let second = r.fetch(&raw).unwrap();
    assert_eq!(call_count(&calls), 0);
    assert_eq!(second.series, first.series);

    let status = r.status().unwrap();
    assert_eq!(status.len(), 2);
    assert!(status.iter().all(|s| s.rows == 20));
}
