//! Cache configuration, stored as TOML.
//!
//! ```toml
//! store_dir = "data/cache"
//! market = "nyse"
//! max_history_start = "1990-01-02"
//!
//! [provider]
//! poll_frequency_ms = 250
//! max_tickers_per_request = 10
//! timeout_secs = 30
//! max_retries = 3
//! circuit_breaker_cooldown_secs = 1800
//! ```
//!
//! Every field is optional; missing fields take the defaults shown.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::calendar::{MarketCalendar, NyseCalendar, WeekdayCalendar};
use crate::data::YahooSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Which trading calendar drives the expected index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    #[default]
    Nyse,
    /// Every weekday, New York hours, no holidays.
    Weekdays,
    /// Every weekday around the clock in UTC.
    Utc,
}

impl Market {
    pub fn calendar(&self) -> Arc<dyn MarketCalendar> {
        match self {
            Market::Nyse => Arc::new(NyseCalendar::new()),
            Market::Weekdays => Arc::new(WeekdayCalendar::default()),
            Market::Utc => Arc::new(WeekdayCalendar::utc()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Minimum spacing between provider requests.
    pub poll_frequency_ms: u64,
    pub max_tickers_per_request: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            poll_frequency_ms: 250,
            max_tickers_per_request: 10,
            timeout_secs: 30,
            max_retries: 3,
            circuit_breaker_cooldown_secs: 30 * 60,
        }
    }
}

impl ProviderConfig {
    pub fn poll_frequency(&self) -> Duration {
        Duration::from_millis(self.poll_frequency_ms)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_secs)
    }

    pub fn yahoo_settings(&self) -> YahooSettings {
        YahooSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            ..YahooSettings::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceCacheConfig {
    pub store_dir: PathBuf,
    pub market: Market,
    /// Calendar start used when a request asks for all history.
    pub max_history_start: NaiveDate,
    pub provider: ProviderConfig,
}

impl Default for PriceCacheConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("data/cache"),
            market: Market::default(),
            max_history_start: NaiveDate::from_ymd_opt(1990, 1, 2).unwrap_or(NaiveDate::MIN),
            provider: ProviderConfig::default(),
        }
    }
}

impl PriceCacheConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = PriceCacheConfig::from_toml("").unwrap();
        assert_eq!(config, PriceCacheConfig::default());
        assert_eq!(config.provider.poll_frequency(), Duration::from_millis(250));
        assert_eq!(config.provider.max_tickers_per_request, 10);
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = PriceCacheConfig::from_toml(
            r#"
            store_dir = "/tmp/prices"
            market = "weekdays"

            [provider]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/tmp/prices"));
        assert_eq!(config.market, Market::Weekdays);
        assert_eq!(config.provider.max_retries, 5);
        assert_eq!(config.provider.timeout_secs, 30);
        assert_eq!(config.market.calendar().name(), "weekdays");
    }

    #[test]
    fn toml_roundtrip() {
        let config = PriceCacheConfig {
            max_history_start: NaiveDate::from_ymd_opt(2000, 1, 3).unwrap(),
            ..PriceCacheConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(PriceCacheConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn utc_market_trades_around_the_clock() {
        let config = PriceCacheConfig::from_toml("market = \"utc\"").unwrap();
        assert_eq!(config.market, Market::Utc);
        let calendar = config.market.calendar();
        assert_eq!(calendar.timezone(), chrono_tz::UTC);
        let date = NaiveDate::from_ymd_opt(2022, 7, 1).unwrap();
        let session = calendar.schedule(date, date)[0];
        assert_eq!(session.open.time(), chrono::NaiveTime::MIN);
    }

    #[test]
    fn unknown_market_is_rejected() {
        assert!(matches!(
            PriceCacheConfig::from_toml("market = \"lse\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = PriceCacheConfig::from_file(Path::new("/nonexistent/pricecache.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pricecache.toml"));
    }
}
