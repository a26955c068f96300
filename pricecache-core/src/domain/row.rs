//! OhlcvRow: one sample of one ticker at one timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV values at a single timestamp.
///
/// Every value is optional: providers skip fields, and the reconciler writes
/// explicit null rows for expected timestamps the provider did not return so
/// that gaps stay visible instead of being zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRow {
    pub timestamp: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
}

impl OhlcvRow {
    /// A row with every value missing.
    pub fn null(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            open: None,
            high: None,
            low: None,
            close: None,
            adj_close: None,
            volume: None,
        }
    }

    /// True when every value is missing.
    pub fn is_null(&self) -> bool {
        self.open.is_none()
            && self.high.is_none()
            && self.low.is_none()
            && self.close.is_none()
            && self.adj_close.is_none()
            && self.volume.is_none()
    }

    /// Basic OHLC sanity check: high >= low, high >= open, high >= close, etc.
    /// Rows with a missing price are not sane.
    pub fn is_sane(&self) -> bool {
        let (Some(open), Some(high), Some(low), Some(close)) =
            (self.open, self.high, self.low, self.close)
        else {
            return false;
        };
        high >= low && high >= open && high >= close && low <= open && low <= close && open > 0.0
    }

    /// Same row moved to another timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
    }

    fn sample_row() -> OhlcvRow {
        OhlcvRow {
            timestamp: ts(),
            open: Some(100.0),
            high: Some(105.0),
            low: Some(98.0),
            close: Some(103.0),
            adj_close: Some(103.0),
            volume: Some(50_000),
        }
    }

    #[test]
    fn row_is_sane() {
        assert!(sample_row().is_sane());
        assert!(!sample_row().is_null());
    }

    #[test]
    fn null_row_is_null_and_not_sane() {
        let row = OhlcvRow::null(ts());
        assert!(row.is_null());
        assert!(!row.is_sane());
    }

    #[test]
    fn volume_alone_is_not_null() {
        let row = OhlcvRow {
            volume: Some(0),
            ..OhlcvRow::null(ts())
        };
        assert!(!row.is_null());
    }

    #[test]
    fn inverted_high_low_is_insane() {
        let row = OhlcvRow {
            high: Some(90.0),
            ..sample_row()
        };
        assert!(!row.is_sane());
    }

    #[test]
    fn row_serialization_roundtrip() {
        let row = OhlcvRow {
            close: None,
            ..sample_row()
        };
        let json = serde_json::to_string(&row).unwrap();
        let back: OhlcvRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }
}
