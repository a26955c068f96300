//! In-process store backend.
//!
//! All handles opened from one [`MemoryBackend`] (or its clones) share the
//! same data. The backend counts open handles so tests can check that every
//! handle is released.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{checked_series, CleanReport, KeyStatus, SeriesStore, StoreBackend, StoreError, StoreKey};
use crate::domain::{canonicalize, CachedSeries, OhlcvRow};

#[derive(Debug, Default)]
struct Entry {
    rows: Vec<OhlcvRow>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Shared {
    entries: Mutex<BTreeMap<StoreKey, Entry>>,
    open_handles: AtomicUsize,
    total_opens: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently alive.
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    /// Handles opened over the backend's lifetime.
    pub fn total_opens(&self) -> usize {
        self.shared.total_opens.load(Ordering::SeqCst)
    }

    /// Store rows exactly as given, bypassing ordering checks. Used to
    /// simulate a damaged store.
    pub fn insert_raw(&self, key: StoreKey, rows: Vec<OhlcvRow>) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        entries.insert(
            key,
            Entry {
                rows,
                updated_at: Some(Utc::now()),
            },
        );
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<StoreKey, Entry>>, StoreError> {
        self.shared.entries.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl StoreBackend for MemoryBackend {
    fn open(&self) -> Result<Box<dyn SeriesStore + '_>, StoreError> {
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        self.shared.total_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStore { backend: self }))
    }
}

/// Handle on a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryStore<'a> {
    backend: &'a MemoryBackend,
}

impl SeriesStore for MemoryStore<'_> {
    fn get(
        &self,
        key: &StoreKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<CachedSeries>, StoreError> {
        let entries = self.backend.lock()?;
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        let series = checked_series(key, entry.rows.clone())?;
        Ok(Some(series.slice(start, end)))
    }

    fn put(&mut self, key: &StoreKey, series: &CachedSeries) -> Result<(), StoreError> {
        let mut entries = self.backend.lock()?;
        entries.insert(
            key.clone(),
            Entry {
                rows: series.rows().to_vec(),
                updated_at: Some(Utc::now()),
            },
        );
        Ok(())
    }

    fn append(&mut self, key: &StoreKey, rows: Vec<OhlcvRow>) -> Result<(), StoreError> {
        let mut entries = self.backend.lock()?;
        let entry = entries.entry(key.clone()).or_default();
        let mut series = checked_series(key, entry.rows.clone())?;
        series.merge(rows);
        entry.rows = series.into_rows();
        entry.updated_at = Some(Utc::now());
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<StoreKey>, StoreError> {
        let entries = self.backend.lock()?;
        Ok(entries
            .keys()
            .filter(|k| k.to_string().starts_with(prefix))
            .cloned()
            .collect())
    }

    fn clean(&mut self) -> Result<CleanReport, StoreError> {
        let mut entries = self.backend.lock()?;
        let mut report = CleanReport::default();
        for (key, entry) in entries.iter_mut() {
            let (rows, removed) = canonicalize(std::mem::take(&mut entry.rows));
            entry.rows = rows;
            if removed > 0 {
                entry.updated_at = Some(Utc::now());
            }
            report.removed.insert(key.to_string(), removed);
        }
        Ok(report)
    }

    fn status(&self) -> Result<Vec<KeyStatus>, StoreError> {
        let entries = self.backend.lock()?;
        entries
            .iter()
            .map(|(key, entry)| KeyStatus::describe(key, &entry.rows, entry.updated_at))
            .collect()
    }
}

impl Drop for MemoryStore<'_> {
    fn drop(&mut self) {
        self.backend.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
