//! PriceCache CLI: fetch, inspect, and maintain the local price cache.
//!
//! Commands:
//! - `fetch`: serve a request from the cache, fetching only missing dates
//! - `update`: refresh every stored ticker over a trailing period
//! - `status`: per-key row counts, date ranges and content hashes
//! - `keys`: list stored keys, optionally by prefix
//! - `clean`: deduplicate and re-sort every stored series
//! - `config`: print the effective configuration as TOML

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use pricecache_core::config::PriceCacheConfig;
use pricecache_core::data::{CircuitBreaker, DataProvider, SyntheticProvider, ThrottledProvider, YahooProvider};
use pricecache_core::domain::{Interval, OhlcvRow, Period};
use pricecache_core::store::KeyStatus;
use pricecache_core::{RawRequest, ReconcileOptions, ReconcileReport, Reconciler, TickerStatus};

#[derive(Parser)]
#[command(name = "pricecache", about = "PriceCache CLI: local market price cache")]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory, overriding the config file.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch prices, reusing whatever is already cached.
    Fetch {
        /// Tickers to fetch (e.g., SPY QQQ AAPL).
        #[arg(required = true)]
        tickers: Vec<String>,

        /// Bar interval: 1m 2m 5m 15m 30m 60m 90m 1h 1d 5d 1wk 1mo 3mo.
        #[arg(long, default_value = "1d")]
        interval: String,

        /// Lookback period: 1d 5d 1mo 3mo 6mo 1y 2y 5y 10y ytd max.
        #[arg(long)]
        period: Option<String>,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Ignore cached rows and refetch the whole range.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Treat cached rows without prices as missing.
        #[arg(long, default_value_t = false)]
        refetch_nulls: bool,

        /// Generate deterministic synthetic prices instead of calling Yahoo.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
        format: OutputFormat,

        /// Write output to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Bring every stored ticker up to date.
    Update {
        /// Interval to refresh; selects the minute or daily store.
        #[arg(long, default_value = "1d")]
        interval: String,

        /// Trailing period to reconcile.
        #[arg(long, default_value = "1y")]
        period: String,

        /// Generate deterministic synthetic prices instead of calling Yahoo.
        #[arg(long, default_value_t = false)]
        synthetic: bool,
    },
    /// Report every stored key.
    Status {
        /// Emit JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List stored keys.
    Keys {
        /// Only keys starting with this prefix, e.g. `/daily/S`.
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Deduplicate and re-sort every stored series.
    Clean,
    /// Print the effective configuration.
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
    Csv,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.store_dir)?;

    match cli.command {
        Commands::Fetch {
            tickers,
            interval,
            period,
            start,
            end,
            force,
            refetch_nulls,
            synthetic,
            format,
            output,
        } => {
            let mut raw = RawRequest::new(tickers).interval(interval);
            if let Some(period) = period {
                raw = raw.period(period);
            }
            if let Some(start) = start {
                raw = raw.start(start);
            }
            if let Some(end) = end {
                raw = raw.end(end);
            }
            let options = ReconcileOptions {
                force,
                refetch_null_rows: refetch_nulls,
            };
            run_fetch(&config, &raw, options, synthetic, format, output.as_deref())
        }
        Commands::Update {
            interval,
            period,
            synthetic,
        } => run_update(&config, &interval, &period, synthetic),
        Commands::Status { json } => run_status(&config, json),
        Commands::Keys { prefix } => run_keys(&config, &prefix),
        Commands::Clean => run_clean(&config),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, store_dir: Option<PathBuf>) -> Result<PriceCacheConfig> {
    let mut config = match path {
        Some(path) => PriceCacheConfig::from_file(path)?,
        None => PriceCacheConfig::default(),
    };
    if let Some(dir) = store_dir {
        config.store_dir = dir;
    }
    Ok(config)
}

fn provider(config: &PriceCacheConfig, synthetic: bool) -> Result<Box<dyn DataProvider>> {
    if synthetic {
        return Ok(Box::new(SyntheticProvider::new(config.market.calendar())));
    }
    let breaker = Arc::new(CircuitBreaker::new(config.provider.circuit_breaker_cooldown()));
    let yahoo = YahooProvider::new(breaker, config.provider.yahoo_settings())?;
    Ok(Box::new(ThrottledProvider::new(
        yahoo,
        config.provider.poll_frequency(),
        config.provider.max_tickers_per_request,
    )))
}

/// Reconciler for commands that never reach a provider.
fn offline(config: &PriceCacheConfig) -> Reconciler {
    Reconciler::from_config(config, SyntheticProvider::new(config.market.calendar()))
}

fn run_fetch(
    config: &PriceCacheConfig,
    raw: &RawRequest,
    options: ReconcileOptions,
    synthetic: bool,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let reconciler = Reconciler::from_config(config, provider(config, synthetic)?).with_options(options);
    let report = reconciler.fetch(raw)?;

    let rendered = match format {
        OutputFormat::Summary => render_summary(&report),
        OutputFormat::Json => serde_json::to_string_pretty(&report)? + "\n",
        OutputFormat::Csv => render_csv(&report)?,
    };
    match output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => print!("{rendered}"),
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        for (ticker, status) in failures {
            eprintln!("Error for {ticker}: {}", describe(status));
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_update(config: &PriceCacheConfig, interval: &str, period: &str, synthetic: bool) -> Result<()> {
    let interval = Interval::from_key(interval)?;
    let period = Period::from_key(period)?;
    let reconciler = Reconciler::from_config(config, provider(config, synthetic)?);
    let reports = reconciler.update(&interval, period)?;
    if reports.is_empty() {
        println!("No {} keys to update.", interval.base());
        return Ok(());
    }

    let mut failed = 0;
    for report in &reports {
        print!("{}", render_summary(report));
        println!();
        for (ticker, status) in report.failures() {
            eprintln!("Error for {ticker}: {}", describe(status));
            failed += 1;
        }
    }
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn render_summary(report: &ReconcileReport) -> String {
    let mut out = String::new();
    let request = &report.request;
    out.push_str(&format!(
        "Interval: {}   Range: {} to {}\n\n",
        request.interval(),
        request
            .start_date()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(all history)".into()),
        request.end_date(),
    ));
    out.push_str(&format!(
        "{:<10} {:>6} {:<20} {:<20} {}\n",
        "Ticker", "Rows", "First", "Last", "Status"
    ));
    out.push_str(&format!("{}\n", "-".repeat(80)));
    for (ticker, status) in &report.status {
        let rows = report.rows(ticker);
        let stamp = |row: Option<&OhlcvRow>| {
            row.map(|r| r.timestamp.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".into())
        };
        out.push_str(&format!(
            "{:<10} {:>6} {:<20} {:<20} {}\n",
            ticker,
            rows.len(),
            stamp(rows.first()),
            stamp(rows.last()),
            describe(status),
        ));
    }
    out
}

fn describe(status: &TickerStatus) -> String {
    match status {
        TickerStatus::Cached => "cached".into(),
        TickerStatus::Fetched {
            start,
            end,
            rows,
            null_rows,
        } => format!("fetched {start}..{end} ({rows} rows, {null_rows} empty)"),
        TickerStatus::FetchFailed { reason } => format!("fetch failed: {reason}"),
        TickerStatus::Invalid { reason } => format!("invalid: {reason}"),
        TickerStatus::NoSessions => "no trading sessions".into(),
    }
}

#[derive(Serialize)]
struct CsvRecord<'a> {
    ticker: &'a str,
    timestamp: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    adj_close: Option<f64>,
    volume: Option<u64>,
}

fn render_csv(report: &ReconcileReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for (ticker, rows) in &report.series {
        for row in rows {
            writer.serialize(CsvRecord {
                ticker,
                timestamp: row.timestamp.to_rfc3339(),
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                adj_close: row.adj_close,
                volume: row.volume,
            })?;
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush CSV: {}", e.error()))?;
    Ok(String::from_utf8(bytes)?)
}

fn run_status(config: &PriceCacheConfig, json: bool) -> Result<()> {
    let status = offline(config).status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    if status.is_empty() {
        println!("Cache is empty: {}", config.store_dir.display());
        return Ok(());
    }

    println!("Store: {}", config.store_dir.display());
    println!("Keys:  {}", status.len());
    println!();
    println!(
        "{:<20} {:>8} {:<12} {:<12} {:<16}",
        "Key", "Rows", "First", "Last", "Hash"
    );
    println!("{}", "-".repeat(72));
    for entry in &status {
        print_status_line(entry);
    }
    Ok(())
}

fn print_status_line(entry: &KeyStatus) {
    let day = |ts: Option<chrono::DateTime<chrono::Utc>>| {
        ts.map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".into())
    };
    let hash: String = entry.data_hash.chars().take(16).collect();
    println!(
        "{:<20} {:>8} {:<12} {:<12} {:<16}",
        entry.key,
        entry.rows,
        day(entry.first),
        day(entry.last),
        hash
    );
}

fn run_keys(config: &PriceCacheConfig, prefix: &str) -> Result<()> {
    for key in offline(config).keys(prefix)? {
        println!("{key}");
    }
    Ok(())
}

fn run_clean(config: &PriceCacheConfig) -> Result<()> {
    let report = offline(config).clean()?;
    if report.removed.is_empty() {
        println!("Store is clean.");
        return Ok(());
    }
    for (key, removed) in &report.removed {
        println!("  {key}: removed {removed} duplicate row(s)");
    }
    println!("Done. Removed {} row(s).", report.total_removed());
    Ok(())
}
