//! Cache store: keyed, appendable time series.
//!
//! A key is `(base granularity, ticker)`, rendered as `/<granularity>/<TICKER>`.
//! Stores are reached through a [`StoreBackend`], which hands out a scoped
//! [`SeriesStore`] handle; the handle releases whatever it holds when dropped.
//!
//! Every mutation leaves the stored series strictly increasing. Reads never
//! repair: a stored series that breaks ordering is reported as
//! [`StoreError::Corruption`] and left alone until [`SeriesStore::clean`].

pub mod memory;
pub mod parquet;

pub use memory::{MemoryBackend, MemoryStore};
pub use parquet::{ParquetBackend, ParquetStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{BaseGranularity, CachedSeries, OhlcvRow};

const MAX_TICKER_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error for {key}: {detail}")]
    Parquet { key: String, detail: String },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("invalid store key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("corrupt series {key}: {detail} (run `clean` to repair)")]
    Corruption { key: String, detail: String },

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}

/// Identifies one stored series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
    granularity: BaseGranularity,
    ticker: String,
}

impl StoreKey {
    /// Tickers may contain ASCII letters, digits and `. - ^ = _`, which
    /// covers index (`^GSPC`), FX (`EURUSD=X`) and share-class (`BRK-B`)
    /// symbols while staying safe as a file name.
    pub fn new(granularity: BaseGranularity, ticker: &str) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidKey {
            key: format!("/{granularity}/{ticker}"),
            reason: reason.to_string(),
        };
        if ticker.is_empty() {
            return Err(invalid("empty ticker"));
        }
        if ticker.len() > MAX_TICKER_LEN {
            return Err(invalid("ticker too long"));
        }
        if ticker.starts_with('.') {
            return Err(invalid("ticker may not start with '.'"));
        }
        if !ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '_'))
        {
            return Err(invalid("unsupported character"));
        }
        Ok(Self {
            granularity,
            ticker: ticker.to_string(),
        })
    }

    pub fn granularity(&self) -> BaseGranularity {
        self.granularity
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.granularity, self.ticker)
    }
}

impl FromStr for StoreKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidKey {
            key: s.to_string(),
            reason: "expected /<granularity>/<TICKER>".to_string(),
        };
        let rest = s.strip_prefix('/').ok_or_else(invalid)?;
        let (granularity, ticker) = rest.split_once('/').ok_or_else(invalid)?;
        let granularity: BaseGranularity = granularity.parse().map_err(|_| invalid())?;
        StoreKey::new(granularity, ticker)
    }
}

/// Rows removed per key by [`SeriesStore::clean`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub removed: BTreeMap<String, usize>,
}

impl CleanReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }
}

/// Summary of one stored key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStatus {
    pub key: String,
    pub rows: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub data_hash: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl KeyStatus {
    pub fn describe(key: &StoreKey, rows: &[OhlcvRow], updated_at: Option<DateTime<Utc>>) -> Result<Self, StoreError> {
        Ok(Self {
            key: key.to_string(),
            rows: rows.len(),
            first: rows.first().map(|r| r.timestamp),
            last: rows.last().map(|r| r.timestamp),
            data_hash: rows_hash(rows)?,
            updated_at,
        })
    }
}

/// blake3 over the JSON encoding of the rows.
pub fn rows_hash(rows: &[OhlcvRow]) -> Result<String, StoreError> {
    let bytes = serde_json::to_vec(rows).map_err(|e| StoreError::Manifest(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// An open store handle.
pub trait SeriesStore {
    /// Rows of `key` with `start <= timestamp <= end`. `None` if the key has
    /// never been written.
    fn get(
        &self,
        key: &StoreKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<CachedSeries>, StoreError>;

    /// Replace the whole series stored under `key`.
    fn put(&mut self, key: &StoreKey, series: &CachedSeries) -> Result<(), StoreError>;

    /// Merge rows into `key`. On timestamp collisions the new row wins.
    fn append(&mut self, key: &StoreKey, rows: Vec<OhlcvRow>) -> Result<(), StoreError>;

    /// Stored keys whose rendered form starts with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<StoreKey>, StoreError>;

    /// Deduplicate (keep last) and re-sort every key.
    fn clean(&mut self) -> Result<CleanReport, StoreError>;

    fn status(&self) -> Result<Vec<KeyStatus>, StoreError>;

    /// Persist pending metadata. Dropping the handle flushes too, but only
    /// an explicit call reports failures.
    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn get_all(&self, key: &StoreKey) -> Result<Option<CachedSeries>, StoreError> {
        self.get(key, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
    }
}

/// Hands out store handles.
pub trait StoreBackend: Send + Sync {
    fn open(&self) -> Result<Box<dyn SeriesStore + '_>, StoreError>;
}

/// Validate stored rows before serving them.
pub(crate) fn checked_series(key: &StoreKey, rows: Vec<OhlcvRow>) -> Result<CachedSeries, StoreError> {
    CachedSeries::try_from_rows(rows).map_err(|violation| {
        tracing::warn!(key = %key, %violation, "stored series is not canonical");
        StoreError::Corruption {
            key: key.to_string(),
            detail: violation.to_string(),
        }
    })
}
