//! CachedSeries: the stored rows of one cache key.
//!
//! A series is always in canonical form: timestamps strictly increasing, no
//! duplicates. Every constructor and mutation preserves that, so the store
//! never has to re-check a series it built itself.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::row::OhlcvRow;

/// Rows for a single (granularity, ticker) key in canonical order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedSeries {
    rows: Vec<OhlcvRow>,
}

/// Where a row sequence first breaks canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderViolation {
    pub index: usize,
    pub previous: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for OrderViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.previous == self.timestamp {
            "duplicate"
        } else {
            "out-of-order"
        };
        write!(
            f,
            "{kind} timestamp {} at row {} (previous {})",
            self.timestamp, self.index, self.previous
        )
    }
}

impl CachedSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from rows in any order. Later duplicates win.
    pub fn from_rows(rows: Vec<OhlcvRow>) -> Self {
        let (rows, _) = canonicalize(rows);
        Self { rows }
    }

    /// Accept rows only if they are already canonical.
    pub fn try_from_rows(rows: Vec<OhlcvRow>) -> Result<Self, OrderViolation> {
        if let Some(violation) = first_violation(&rows) {
            return Err(violation);
        }
        Ok(Self { rows })
    }

    /// Merge `incoming` into the series. On timestamp collisions the incoming
    /// row replaces the stored one.
    pub fn merge(&mut self, incoming: Vec<OhlcvRow>) {
        if incoming.is_empty() {
            return;
        }
        let mut by_ts: BTreeMap<DateTime<Utc>, OhlcvRow> = std::mem::take(&mut self.rows)
            .into_iter()
            .map(|row| (row.timestamp, row))
            .collect();
        for row in incoming {
            by_ts.insert(row.timestamp, row);
        }
        self.rows = by_ts.into_values().collect();
    }

    /// Rows with `start <= timestamp <= end`.
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[OhlcvRow] {
        if start > end {
            return &[];
        }
        let lo = self.rows.partition_point(|r| r.timestamp < start);
        let hi = self.rows.partition_point(|r| r.timestamp <= end);
        &self.rows[lo..hi]
    }

    /// Copy of the series restricted to `[start, end]`.
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            rows: self.range(start, end).to_vec(),
        }
    }

    pub fn rows(&self) -> &[OhlcvRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<OhlcvRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.rows.first().map(|r| r.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.rows.last().map(|r| r.timestamp)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.rows.iter().map(|r| r.timestamp)
    }
}

/// Sort rows by timestamp and drop duplicates, keeping the last occurrence in
/// input order. Returns the canonical rows and how many were removed.
pub fn canonicalize(rows: Vec<OhlcvRow>) -> (Vec<OhlcvRow>, usize) {
    let before = rows.len();
    let mut by_ts: BTreeMap<DateTime<Utc>, OhlcvRow> = BTreeMap::new();
    for row in rows {
        by_ts.insert(row.timestamp, row);
    }
    let rows: Vec<OhlcvRow> = by_ts.into_values().collect();
    let removed = before - rows.len();
    (rows, removed)
}

/// First position where timestamps fail to strictly increase.
pub fn first_violation(rows: &[OhlcvRow]) -> Option<OrderViolation> {
    rows.windows(2).enumerate().find_map(|(i, pair)| {
        (pair[1].timestamp <= pair[0].timestamp).then(|| OrderViolation {
            index: i + 1,
            previous: pair[0].timestamp,
            timestamp: pair[1].timestamp,
        })
    })
}
