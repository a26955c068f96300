//! Serving requests from the store, fetching only what is missing.
//!
//! One call to [`Reconciler::get_data`] runs, per ticker:
//!
//! 1. read the stored series (one calendar day wider than the request, so
//!    timezone skew at the edges never looks like a gap)
//! 2. diff its dates against the expected calendar index
//! 3. fetch the span from the first to the last missing date at the base
//!    granularity, with tickers sharing a span grouped into one provider call
//! 4. reindex the fetched rows onto the expected timestamps and merge them
//! 5. slice the requested window, drop null rows, resample if the requested
//!    interval is not a base granularity
//!
//! The store handle is opened once per call and released when the call
//! returns, error or not.

pub mod plan;
pub mod report;

pub use plan::{plan_fetch, FetchPlan};
pub use report::{ReconcileReport, TickerStatus};

use chrono::NaiveDate;
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

use crate::calendar::{local_day_bounds, CalendarIndex, MarketCalendar};
use crate::clock::{Clock, SystemClock};
use crate::config::PriceCacheConfig;
use crate::data::{aggregate, reindex, DataProvider};
use crate::domain::{BaseGranularity, Interval, OhlcvRow, Period};
use crate::error::CacheError;
use crate::request::{normalize, RawRequest, Request};
use crate::store::{CleanReport, KeyStatus, ParquetBackend, SeriesStore, StoreBackend, StoreKey};

/// Per-call switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Ignore stored rows and refetch the whole range.
    pub force: bool,
    /// Treat stored null rows as missing.
    pub refetch_null_rows: bool,
}

pub struct Reconciler {
    calendar: Arc<dyn MarketCalendar>,
    store: Box<dyn StoreBackend>,
    provider: Box<dyn DataProvider>,
    clock: Box<dyn Clock>,
    max_history_start: NaiveDate,
    update_batch_size: usize,
    options: ReconcileOptions,
}

/// Everything the per-ticker steps share within one call.
struct Window<'r> {
    request: &'r Request,
    tz: Tz,
    base: Interval,
    start: NaiveDate,
    end: NaiveDate,
    expected: CalendarIndex,
}

impl Reconciler {
    pub fn new(
        calendar: Arc<dyn MarketCalendar>,
        store: impl StoreBackend + 'static,
        provider: impl DataProvider + 'static,
    ) -> Self {
        Self {
            calendar,
            store: Box::new(store),
            provider: Box::new(provider),
            clock: Box::new(SystemClock),
            max_history_start: PriceCacheConfig::default().max_history_start,
            update_batch_size: PriceCacheConfig::default().provider.max_tickers_per_request,
            options: ReconcileOptions::default(),
        }
    }

    /// Parquet store and calendar as configured.
    pub fn from_config(config: &PriceCacheConfig, provider: impl DataProvider + 'static) -> Self {
        Self::new(
            config.market.calendar(),
            ParquetBackend::new(&config.store_dir),
            provider,
        )
        .with_max_history_start(config.max_history_start)
        .with_update_batch_size(config.provider.max_tickers_per_request)
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_history_start(mut self, start: NaiveDate) -> Self {
        self.max_history_start = start;
        self
    }

    /// Tickers per reconcile call in [`Reconciler::update`].
    pub fn with_update_batch_size(mut self, size: usize) -> Self {
        self.update_batch_size = size.max(1);
        self
    }

    pub fn calendar(&self) -> &dyn MarketCalendar {
        self.calendar.as_ref()
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// Validate a raw request against today's date in the market timezone.
    pub fn request(&self, raw: &RawRequest) -> Result<Request, CacheError> {
        let today = self.clock.today(self.calendar.timezone());
        Ok(normalize(raw, today)?)
    }

    /// Normalize and serve in one step.
    pub fn fetch(&self, raw: &RawRequest) -> Result<ReconcileReport, CacheError> {
        let request = self.request(raw)?;
        self.get_data(&request)
    }

    pub fn get_data(&self, request: &Request) -> Result<ReconcileReport, CacheError> {
        self.get_data_with(request, self.options)
    }

    /// Serve `request`. Provider failures and bad tickers are reported per
    /// ticker in the result; store failures abort the call.
    pub fn get_data_with(
        &self,
        request: &Request,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport, CacheError> {
        let tz = self.calendar.timezone();
        let base = request.interval().base().interval();
        let start = request.start_date().unwrap_or(self.max_history_start);
        let end = request.end_date();
        let expected = CalendarIndex::compute(self.calendar.as_ref(), start, end, &base)
            .not_after(self.clock.now());
        let window = Window {
            request,
            tz,
            base,
            start,
            end,
            expected,
        };

        info!(
            tickers = request.tickers().len(),
            interval = %request.interval(),
            %start,
            %end,
            expected = window.expected.len(),
            "reconcile"
        );

        let mut store = self.store.open()?;
        let mut report = ReconcileReport::new(request.clone());
        let mut keys: Vec<(String, StoreKey)> = Vec::with_capacity(request.tickers().len());
        let mut pending: BTreeMap<(NaiveDate, NaiveDate), Vec<String>> = BTreeMap::new();
        let mut statuses: BTreeMap<String, TickerStatus> = BTreeMap::new();

        for ticker in request.tickers() {
            let key = match StoreKey::new(window.base_granularity(), ticker) {
                Ok(key) => key,
                Err(e) => {
                    warn!(%ticker, error = %e, "skipping ticker");
                    report.record(ticker, Vec::new(), TickerStatus::Invalid { reason: e.to_string() });
                    continue;
                }
            };
            let stored = if options.force {
                None
            } else {
                let (lo, hi) = local_day_bounds(
                    window.start.pred_opt().unwrap_or(window.start),
                    window.end.succ_opt().unwrap_or(window.end),
                    tz,
                );
                store.get(&key, lo, hi)?
            };
            match plan_fetch(&window.expected, stored.as_ref(), tz, options.refetch_null_rows) {
                FetchPlan::NoSessions => {
                    statuses.insert(ticker.clone(), TickerStatus::NoSessions);
                }
                FetchPlan::UpToDate => {
                    debug!(%ticker, "served from cache");
                    statuses.insert(ticker.clone(), TickerStatus::Cached);
                }
                FetchPlan::Fetch { start, end, missing } => {
                    debug!(%ticker, %start, %end, missing, "dates missing");
                    pending.entry((start, end)).or_default().push(ticker.clone());
                }
            }
            keys.push((ticker.clone(), key));
        }

        for ((start, end), tickers) in pending {
            self.fetch_span(store.as_mut(), &window, &keys, start, end, &tickers, &mut statuses)?;
        }

        for (ticker, key) in &keys {
            let rows = self.assemble(store.as_ref(), &window, key)?;
            let status = statuses.remove(ticker).unwrap_or(TickerStatus::Cached);
            report.record(ticker, rows, status);
        }

        store.flush()?;
        info!(fetched = report.fetched(), failed = report.failures().count(), "reconcile done");
        Ok(report)
    }

    /// Fetch one missing span for every ticker that shares it, then merge.
    #[allow(clippy::too_many_arguments)]
    fn fetch_span(
        &self,
        store: &mut dyn SeriesStore,
        window: &Window<'_>,
        keys: &[(String, StoreKey)],
        start: NaiveDate,
        end: NaiveDate,
        tickers: &[String],
        statuses: &mut BTreeMap<String, TickerStatus>,
    ) -> Result<(), CacheError> {
        let _span = info_span!("fetch", provider = self.provider.name(), %start, %end).entered();
        let mut batch = match self.provider.fetch(tickers, &window.base, start, end) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, tickers = tickers.len(), "provider fetch failed");
                for ticker in tickers {
                    statuses.insert(ticker.clone(), TickerStatus::FetchFailed { reason: e.to_string() });
                }
                return Ok(());
            }
        };

        let slots = window.expected.between_dates(start, end, window.tz);
        for ticker in tickers {
            let rows = batch.remove(ticker).unwrap_or_default();
            if rows.is_empty() {
                warn!(%ticker, "provider returned no rows");
                statuses.insert(
                    ticker.clone(),
                    TickerStatus::FetchFailed {
                        reason: "provider returned no rows".to_string(),
                    },
                );
                continue;
            }
            let Some((_, key)) = keys.iter().find(|(t, _)| t == ticker) else {
                continue;
            };
            let aligned = reindex(rows, &slots, window.base_granularity(), window.tz);
            let null_rows = aligned.iter().filter(|r| r.is_null()).count();
            let filled = aligned.len() - null_rows;
            store.append(key, aligned)?;
            info!(%ticker, rows = filled, null_rows, "merged");
            statuses.insert(
                ticker.clone(),
                TickerStatus::Fetched {
                    start,
                    end,
                    rows: filled,
                    null_rows,
                },
            );
        }
        Ok(())
    }

    /// The requested window of `key`, null rows dropped, resampled when the
    /// requested interval is derived.
    fn assemble(
        &self,
        store: &dyn SeriesStore,
        window: &Window<'_>,
        key: &StoreKey,
    ) -> Result<Vec<OhlcvRow>, CacheError> {
        let (lo, hi) = local_day_bounds(window.start, window.end, window.tz);
        let rows: Vec<OhlcvRow> = store
            .get(key, lo, hi)?
            .map(|series| series.into_rows())
            .unwrap_or_default()
            .into_iter()
            .filter(|row| !row.is_null())
            .collect();

        let interval = window.request.interval();
        if interval.is_base() {
            return Ok(rows);
        }
        let buckets = CalendarIndex::compute(self.calendar.as_ref(), window.start, window.end, interval);
        Ok(aggregate(&rows, &buckets))
    }

    /// Bring every ticker stored under `interval`'s base granularity up to
    /// date over the trailing `period`, one report per batch of tickers.
    pub fn update(&self, interval: &Interval, period: Period) -> Result<Vec<ReconcileReport>, CacheError> {
        let prefix = format!("/{}/", interval.base());
        let tickers: Vec<String> = self
            .keys(&prefix)?
            .iter()
            .map(|key| key.ticker().to_string())
            .collect();
        info!(tickers = tickers.len(), %interval, %period, "update");

        let mut reports = Vec::with_capacity(tickers.len().div_ceil(self.update_batch_size));
        for chunk in tickers.chunks(self.update_batch_size) {
            let raw = RawRequest::new(chunk.to_vec())
                .interval(interval.key())
                .period(period);
            reports.push(self.fetch(&raw)?);
        }
        Ok(reports)
    }

    /// Deduplicate and re-sort every stored series.
    pub fn clean(&self) -> Result<CleanReport, CacheError> {
        let mut store = self.store.open()?;
        let report = store.clean()?;
        store.flush()?;
        info!(removed = report.total_removed(), "store cleaned");
        Ok(report)
    }

    pub fn status(&self) -> Result<Vec<KeyStatus>, CacheError> {
        let store = self.store.open()?;
        Ok(store.status()?)
    }

    pub fn keys(&self, prefix: &str) -> Result<Vec<StoreKey>, CacheError> {
        let store = self.store.open()?;
        Ok(store.keys(prefix)?)
    }
}

impl Window<'_> {
    fn base_granularity(&self) -> BaseGranularity {
        self.request.interval().base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::NyseCalendar;
    use crate::clock::FixedClock;
    use crate::data::{ProviderBatch, ProviderError, SyntheticProvider};
    use crate::store::MemoryBackend;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Synthetic data, counting calls. Tickers starting with "BAD" fail.
    struct Counting {
        inner: SyntheticProvider,
        calls: Arc<AtomicUsize>,
    }

    impl DataProvider for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn fetch(
            &self,
            tickers: &[String],
            interval: &Interval,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<ProviderBatch, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if tickers.iter().any(|t| t.starts_with("BAD")) {
                return Err(ProviderError::NetworkUnreachable("offline".into()));
            }
            self.inner.fetch(tickers, interval, start, end)
        }
    }

    fn reconciler() -> (Reconciler, MemoryBackend, Arc<AtomicUsize>) {
        let calendar: Arc<dyn MarketCalendar> = Arc::new(NyseCalendar::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Counting {
            inner: SyntheticProvider::new(calendar.clone()),
            calls: calls.clone(),
        };
        let backend = MemoryBackend::new();
        let r = Reconciler::new(calendar, backend.clone(), provider)
            .with_clock(FixedClock(Utc.with_ymd_and_hms(2022, 8, 4, 12, 0, 0).unwrap()));
        (r, backend, calls)
    }

    #[test]
    fn second_call_is_served_from_cache() {
        let (r, _, calls) = reconciler();
        let raw = RawRequest::new("FAKE").start("2022-08-01").end("2022-08-03");
        let first = r.fetch(&raw).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.rows("FAKE").len(), 3);
        assert!(matches!(first.status["FAKE"], TickerStatus::Fetched { rows: 3, .. }));

        let second = r.fetch(&raw).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.status["FAKE"], TickerStatus::Cached);
        assert_eq!(second.series, first.series);
    }

    #[test]
    fn tickers_with_the_same_gap_share_a_call() {
        let (r, _, calls) = reconciler();
        let raw = RawRequest::new(vec!["AAA", "BBB", "CCC"]).start("2022-07-01").end("2022-07-29");
        let report = r.fetch(&raw).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.fetched(), 3);
    }

    #[test]
    fn provider_failure_keeps_other_tickers() {
        let (r, _, _) = reconciler();
        let good = r.fetch(&RawRequest::new("GOOD").start("2022-07-01").end("2022-07-29")).unwrap();
        assert_eq!(good.rows("GOOD").len(), 20);

        let raw = RawRequest::new(vec!["GOOD", "BADX"]).start("2022-07-01").end("2022-07-29");
        let report = r.fetch(&raw).unwrap();
        assert_eq!(report.status["GOOD"], TickerStatus::Cached);
        assert_eq!(report.rows("GOOD").len(), 20);
        assert!(matches!(report.status["BADX"], TickerStatus::FetchFailed { .. }));
        assert!(report.rows("BADX").is_empty());
    }

    #[test]
    fn invalid_ticker_is_reported_not_fatal() {
        let (r, _, calls) = reconciler();
        let raw = RawRequest::new(vec!["../etc", "OK"]).start("2022-08-01").end("2022-08-03");
        let report = r.fetch(&raw).unwrap();
        assert!(matches!(report.status["../ETC"], TickerStatus::Invalid { .. }));
        assert_eq!(report.rows("OK").len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn holiday_only_range_makes_no_call() {
        let (r, _, calls) = reconciler();
        let raw = RawRequest::new("FAKE").start("2022-07-02").end("2022-07-04");
        let report = r.fetch(&raw).unwrap();
        assert_eq!(report.status["FAKE"], TickerStatus::NoSessions);
        assert!(report.rows("FAKE").is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn future_sessions_are_not_expected() {
        let (r, _, calls) = reconciler();
        let raw = RawRequest::new("FAKE").start("2022-08-01").end("2022-08-12");
        let first = r.fetch(&raw).unwrap();
        // The clock sits on 2022-08-04 12:00 UTC, before that day's open.
        assert_eq!(first.rows("FAKE").len(), 3);
        r.fetch(&raw).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn force_refetches() {
        let (r, _, calls) = reconciler();
        let raw = RawRequest::new("FAKE").start("2022-08-01").end("2022-08-03");
        r.fetch(&raw).unwrap();
        let request = r.request(&raw).unwrap();
        let forced = ReconcileOptions {
            force: true,
            ..ReconcileOptions::default()
        };
        let report = r.get_data_with(&request, forced).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(report.status["FAKE"], TickerStatus::Fetched { .. }));
    }

    #[test]
    fn store_handle_is_released() {
        let (r, backend, _) = reconciler();
        r.fetch(&RawRequest::new("FAKE").start("2022-08-01").end("2022-08-03")).unwrap();
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(backend.total_opens(), 1);
        let _ = r.fetch(&RawRequest::new("FAKE").interval("7d"));
        assert_eq!(backend.total_opens(), 1, "validation errors happen before the store is opened");
    }

    #[test]
    fn derived_interval_is_resampled_from_daily() {
        let (r, backend, _) = reconciler();
        let raw = RawRequest::new("FAKE").interval("1wk").start("2022-07-01").end("2022-07-29");
        let report = r.fetch(&raw).unwrap();
        let weekly = report.rows("FAKE");
        assert_eq!(weekly.len(), 5);

        let key = StoreKey::new(BaseGranularity::Daily, "FAKE").unwrap();
        let handle = backend.open().unwrap();
        let daily = handle.get_all(&key).unwrap().unwrap();
        assert_eq!(daily.len(), 20);
        let total: u64 = daily.rows().iter().filter_map(|row| row.volume).sum();
        assert_eq!(weekly.iter().filter_map(|row| row.volume).sum::<u64>(), total);
    }

    #[test]
    fn update_refreshes_stored_tickers_in_batches() {
        let (r, _, calls) = reconciler();
        let r = r.with_update_batch_size(2);
        r.fetch(&RawRequest::new(vec!["AAA", "BBB", "CCC"]).start("2022-07-01").end("2022-07-29"))
            .unwrap();
        r.fetch(&RawRequest::new("MIN").interval("5m").start("2022-08-01").end("2022-08-02"))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let daily = Interval::from_key("1d").unwrap();
        let month = Period::from_key("1mo").unwrap();
        let reports = r.update(&daily, month).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let updated: Vec<&String> = reports.iter().flat_map(|report| report.status.keys()).collect();
        assert_eq!(updated, ["AAA", "BBB", "CCC"]);
        for report in &reports {
            for status in report.status.values() {
                // Stored through 07-29; 08-01 to 08-03 were missing.
                assert!(matches!(status, TickerStatus::Fetched { rows: 3, .. }), "{status:?}");
            }
        }

        let again = r.update(&daily, month).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(again
            .iter()
            .flat_map(|report| report.status.values())
            .all(|status| *status == TickerStatus::Cached));
    }

    #[test]
    fn update_on_empty_store_does_nothing() {
        let (r, _, calls) = reconciler();
        let reports = r
            .update(&Interval::from_key("1d").unwrap(), Period::from_key("1y").unwrap())
            .unwrap();
        assert!(reports.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn status_and_clean_open_their_own_handles() {
        let (r, backend, _) = reconciler();
        r.fetch(&RawRequest::new(vec!["AAA", "BBB"]).start("2022-08-01").end("2022-08-03")).unwrap();
        let status = r.status().unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(r.keys("/daily/A").unwrap().len(), 1);
        assert_eq!(r.clean().unwrap().total_removed(), 0);
        assert_eq!(backend.open_handles(), 0);
    }
}
