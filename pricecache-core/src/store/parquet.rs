//! Parquet store backend.
//!
//! Layout: `{root}/{granularity}/{TICKER}.parquet`, plus `{root}/manifest.json`
//! holding per-key metadata (row count, first/last timestamp, data hash,
//! last write time).
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Ordering validated on every read, never repaired inline
//! - Manifest kept in memory per handle and flushed when the handle closes

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{
    checked_series, rows_hash, CleanReport, KeyStatus, SeriesStore, StoreBackend, StoreError, StoreKey,
};
use crate::domain::{canonicalize, BaseGranularity, CachedSeries, OhlcvRow};

const MANIFEST_FILE: &str = "manifest.json";
const COLUMNS: [&str; 7] = ["timestamp", "open", "high", "low", "close", "adj_close", "volume"];

/// Metadata recorded for each key on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMeta {
    pub rows: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub data_hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub keys: BTreeMap<String, KeyMeta>,
}

#[derive(Debug, Clone)]
pub struct ParquetBackend {
    root: PathBuf,
}

impl ParquetBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StoreBackend for ParquetBackend {
    fn open(&self) -> Result<Box<dyn SeriesStore + '_>, StoreError> {
        Ok(Box::new(ParquetStore::open(&self.root)?))
    }
}

/// Handle on a Parquet store directory.
#[derive(Debug)]
pub struct ParquetStore<'a> {
    root: &'a Path,
    manifest: Manifest,
    dirty: bool,
}

impl<'a> ParquetStore<'a> {
    pub fn open(root: &'a Path) -> Result<Self, StoreError> {
        fs::create_dir_all(root).map_err(StoreError::io(root))?;
        let manifest_path = root.join(MANIFEST_FILE);
        let manifest = if manifest_path.exists() {
            let text = fs::read_to_string(&manifest_path).map_err(StoreError::io(&manifest_path))?;
            serde_json::from_str(&text)
                .map_err(|e| StoreError::Manifest(format!("{}: {e}", manifest_path.display())))?
        } else {
            Manifest::default()
        };
        Ok(Self {
            root,
            manifest,
            dirty: false,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn path(&self, key: &StoreKey) -> PathBuf {
        self.root
            .join(key.granularity().as_str())
            .join(format!("{}.parquet", key.ticker()))
    }

    /// Raw rows as stored, in file order.
    fn read_rows(&self, key: &StoreKey) -> Result<Option<Vec<OhlcvRow>>, StoreError> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&path).map_err(StoreError::io(&path))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| parquet_err(key, format!("read: {e}")))?;
        dataframe_to_rows(key, &df).map(Some)
    }

    fn write_rows(&mut self, key: &StoreKey, rows: &[OhlcvRow]) -> Result<(), StoreError> {
        let path = self.path(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(StoreError::io(dir))?;
        }
        let mut df = rows_to_dataframe(key, rows)?;
        let tmp_path = path.with_extension("parquet.tmp");

        let written = fs::File::create(&tmp_path)
            .map_err(StoreError::io(&tmp_path))
            .and_then(|file| {
                ParquetWriter::new(file)
                    .finish(&mut df)
                    .map_err(|e| parquet_err(key, format!("write: {e}")))
            })
            .and_then(|_| fs::rename(&tmp_path, &path).map_err(StoreError::io(&path)));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        self.manifest.keys.insert(
            key.to_string(),
            KeyMeta {
                rows: rows.len(),
                first: rows.first().map(|r| r.timestamp),
                last: rows.last().map(|r| r.timestamp),
                data_hash: rows_hash(rows)?,
                updated_at: Utc::now(),
            },
        );
        self.dirty = true;
        debug!(key = %key, rows = rows.len(), "wrote series");
        Ok(())
    }

    fn write_manifest(&self) -> Result<(), StoreError> {
        let path = self.root.join(MANIFEST_FILE);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.manifest)
            .map_err(|e| StoreError::Manifest(format!("serialize: {e}")))?;
        fs::write(&tmp_path, json).map_err(StoreError::io(&tmp_path))?;
        fs::rename(&tmp_path, &path).map_err(StoreError::io(&path))
    }
}

impl SeriesStore for ParquetStore<'_> {
    fn get(
        &self,
        key: &StoreKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<CachedSeries>, StoreError> {
        let Some(rows) = self.read_rows(key)? else {
            return Ok(None);
        };
        let series = checked_series(key, rows)?;
        Ok(Some(series.slice(start, end)))
    }

    fn put(&mut self, key: &StoreKey, series: &CachedSeries) -> Result<(), StoreError> {
        self.write_rows(key, series.rows())
    }

    fn append(&mut self, key: &StoreKey, rows: Vec<OhlcvRow>) -> Result<(), StoreError> {
        let mut series = match self.read_rows(key)? {
            Some(existing) => checked_series(key, existing)?,
            None => CachedSeries::new(),
        };
        series.merge(rows);
        self.write_rows(key, series.rows())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<StoreKey>, StoreError> {
        let mut keys = Vec::new();
        for granularity in BaseGranularity::ALL {
            let dir = self.root.join(granularity.as_str());
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir).map_err(StoreError::io(&dir))? {
                let path = entry.map_err(StoreError::io(&dir))?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                    continue;
                }
                let Some(ticker) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match StoreKey::new(granularity, ticker) {
                    Ok(key) if key.to_string().starts_with(prefix) => keys.push(key),
                    Ok(_) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unrecognised file"),
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn clean(&mut self) -> Result<CleanReport, StoreError> {
        let mut report = CleanReport::default();
        for key in self.keys("")? {
            let rows = self.read_rows(&key)?.unwrap_or_default();
            let in_order = crate::domain::first_violation(&rows).is_none();
            let (rows, removed) = canonicalize(rows);
            if !in_order || !self.manifest.keys.contains_key(&key.to_string()) {
                self.write_rows(&key, &rows)?;
            }
            if removed > 0 {
                warn!(key = %key, removed, "clean removed duplicate rows");
            }
            report.removed.insert(key.to_string(), removed);
        }
        self.flush()?;
        Ok(report)
    }

    fn status(&self) -> Result<Vec<KeyStatus>, StoreError> {
        self.keys("")?
            .iter()
            .map(|key| match self.manifest.keys.get(&key.to_string()) {
                Some(meta) => Ok(KeyStatus {
                    key: key.to_string(),
                    rows: meta.rows,
                    first: meta.first,
                    last: meta.last,
                    data_hash: meta.data_hash.clone(),
                    updated_at: Some(meta.updated_at),
                }),
                None => {
                    let rows = self.read_rows(key)?.unwrap_or_default();
                    KeyStatus::describe(key, &rows, None)
                }
            })
            .collect()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.dirty {
            self.write_manifest()?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl Drop for ParquetStore<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush manifest on close");
        }
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn parquet_err(key: &StoreKey, detail: String) -> StoreError {
    StoreError::Parquet {
        key: key.to_string(),
        detail,
    }
}

fn rows_to_dataframe(key: &StoreKey, rows: &[OhlcvRow]) -> Result<DataFrame, StoreError> {
    let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp.timestamp_millis()).collect();
    let opens: Vec<Option<f64>> = rows.iter().map(|r| r.open).collect();
    let highs: Vec<Option<f64>> = rows.iter().map(|r| r.high).collect();
    let lows: Vec<Option<f64>> = rows.iter().map(|r| r.low).collect();
    let closes: Vec<Option<f64>> = rows.iter().map(|r| r.close).collect();
    let adj_closes: Vec<Option<f64>> = rows.iter().map(|r| r.adj_close).collect();
    let volumes: Vec<Option<u64>> = rows.iter().map(|r| r.volume).collect();

    DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("adj_close".into(), adj_closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| parquet_err(key, format!("dataframe creation: {e}")))
}

fn dataframe_to_rows(key: &StoreKey, df: &DataFrame) -> Result<Vec<OhlcvRow>, StoreError> {
    for name in COLUMNS {
        if df.column(name).is_err() {
            return Err(StoreError::Corruption {
                key: key.to_string(),
                detail: format!("missing column '{name}'"),
            });
        }
    }
    let column_err = |name: &str, e: PolarsError| parquet_err(key, format!("{name} column: {e}"));
    let float = |name: &str| {
        df.column(name)
            .and_then(|c| c.f64().cloned())
            .map_err(|e| column_err(name, e))
    };

    let ts_ca = df
        .column("timestamp")
        .and_then(|c| c.i64().cloned())
        .map_err(|e| column_err("timestamp", e))?;
    let open_ca = float("open")?;
    let high_ca = float("high")?;
    let low_ca = float("low")?;
    let close_ca = float("close")?;
    let adj_ca = float("adj_close")?;
    let vol_ca = df
        .column("volume")
        .and_then(|c| c.u64().cloned())
        .map_err(|e| column_err("volume", e))?;

    let n = df.height();
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let timestamp = ts_ca
            .get(i)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| StoreError::Corruption {
                key: key.to_string(),
                detail: format!("null or invalid timestamp at row {i}"),
            })?;
        rows.push(OhlcvRow {
            timestamp,
            open: open_ca.get(i),
            high: high_ca.get(i),
            low: low_ca.get(i),
            close: close_ca.get(i),
            adj_close: adj_ca.get(i),
            volume: vol_ca.get(i),
        });
    }
    Ok(rows)
}
