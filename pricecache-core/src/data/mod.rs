//! Market-data providers and the transforms applied to their output.

pub mod align;
pub mod batch;
pub mod circuit_breaker;
pub mod provider;
pub mod rate_limit;
pub mod resample;
pub mod synthetic;
pub mod yahoo;

pub use align::reindex;
pub use batch::{for_each_batch, ThrottledProvider};
pub use circuit_breaker::CircuitBreaker;
pub use provider::{DataProvider, ProviderBatch, ProviderError};
pub use rate_limit::RateLimiter;
pub use resample::aggregate;
pub use synthetic::SyntheticProvider;
pub use yahoo::{YahooProvider, YahooSettings};
