//! Domain types: intervals, periods, rows and cached series.

pub mod interval;
pub mod period;
pub mod row;
pub mod series;

pub use interval::{BaseGranularity, DailyFrequency, Interval, SUPPORTED_INTERVALS};
pub use period::{Period, PeriodUnit, SUPPORTED_PERIODS};
pub use row::OhlcvRow;
pub use series::{canonicalize, first_violation, CachedSeries, OrderViolation};
