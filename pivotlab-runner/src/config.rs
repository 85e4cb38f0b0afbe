//! Application configuration: TOML file, environment overrides, validation.
//!
//! Every section deserializes with defaults, so an empty file is a valid
//! configuration. Environment variables from the original deployment
//! (`ACCOUNT_SIZE`, `RISK_PER_TRADE`, `AUTO_EXECUTE_TRADES`) and the file
//! locations are applied on top of the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use pivotlab_core::risk::{EntryConfig, LadderConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub account: AccountConfig,
    pub entry: EntryConfig,
    pub ladder: LadderConfig,
    pub live: LiveConfig,
    pub backtest: BacktestConfig,
    pub data: DataConfig,
    pub files: FilesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub account_size: f64,
    /// Fraction of account value risked per trade.
    pub risk_per_trade: f64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            account_size: 10_000.0,
            risk_per_trade: 0.01,
        }
    }
}

/// Market-hours schedule and alert thresholds for live monitoring.
///
/// Times are exchange-local wall-clock `HH:MM`; the process is expected to
/// run in the exchange's timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub market_open: String,
    pub market_close: String,
    pub pre_close_minutes: u32,
    /// Wait after the close before the end-of-day evaluation, so the
    /// official daily bar is published.
    pub post_close_delay_minutes: u32,
    /// End-of-day evaluation is attempted until this long after the close.
    pub post_close_window_minutes: u32,
    pub check_interval_secs: u64,
    /// Send exits to the order sink; when false they are logged for manual
    /// action.
    pub auto_execute: bool,
    /// Day-one alert when the price is within this fraction of the stop.
    pub near_stop_pct: f64,
    /// Alert when the price is within this fraction of the trailing MA.
    pub near_ma_pct: f64,
    /// Stop after this many polling cycles. Unbounded when absent.
    pub max_cycles: Option<u64>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            market_open: "09:30".into(),
            market_close: "16:00".into(),
            pre_close_minutes: 5,
            post_close_delay_minutes: 5,
            post_close_window_minutes: 60,
            check_interval_secs: 60,
            auto_execute: true,
            near_stop_pct: 0.02,
            near_ma_pct: 0.01,
            max_cycles: None,
        }
    }
}

impl LiveConfig {
    pub fn open_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_time("live.market_open", &self.market_open)
    }

    pub fn close_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_time("live.market_close", &self.market_close)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .map_err(|_| ConfigError::Invalid(format!("{field} '{value}' is not HH:MM")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Calendar days the replay may advance before force-closing.
    pub max_iterations: u32,
    /// A symbol whose next bar is further away than this is treated as
    /// out of data.
    pub max_gap_days: u32,
    /// Replay starts at the earliest purchase date unless set.
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3_650,
            max_gap_days: 14,
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub cache_dir: PathBuf,
    /// Per-symbol `{SYMBOL}.csv` files used instead of the Parquet cache.
    pub csv_dir: Option<PathBuf>,
    /// Calendar days of history fetched before the purchase date.
    pub history_lookback_days: u32,
    pub max_concurrent_fetches: usize,
    pub min_request_spacing_ms: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/cache"),
            csv_dir: None,
            history_lookback_days: 60,
            max_concurrent_fetches: 4,
            min_request_spacing_ms: 250,
            request_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub watchlist: PathBuf,
    pub trade_ledger: PathBuf,
    pub report_dir: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            watchlist: PathBuf::from("watchlist.csv"),
            trade_ledger: PathBuf::from("trade_results.csv"),
            report_dir: PathBuf::from("reports"),
        }
    }
}

impl AppConfig {
    /// Parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, then apply `.env` and process environment
    /// overrides, then validate.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        dotenvy::dotenv().ok();
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`. Unparseable values
    /// are logged and ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("ACCOUNT_SIZE") {
            match raw.trim().parse::<f64>() {
                Ok(v) if v > 0.0 => {
                    info!(account_size = v, "account size from environment");
                    self.account.account_size = v;
                }
                _ => warn!(value = %raw, "ignoring invalid ACCOUNT_SIZE"),
            }
        }
        if let Some(raw) = lookup("RISK_PER_TRADE") {
            match raw.trim().parse::<f64>() {
                Ok(v) if v > 0.0 && v <= 1.0 => self.account.risk_per_trade = v,
                _ => warn!(value = %raw, "ignoring invalid RISK_PER_TRADE"),
            }
        }
        if let Some(raw) = lookup("AUTO_EXECUTE_TRADES") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => self.live.auto_execute = true,
                "false" | "0" | "no" => self.live.auto_execute = false,
                _ => warn!(value = %raw, "ignoring invalid AUTO_EXECUTE_TRADES"),
            }
        }
        if let Some(raw) = lookup("PIVOTLAB_WATCHLIST").filter(|s| !s.trim().is_empty()) {
            self.files.watchlist = PathBuf::from(raw.trim());
        }
        if let Some(raw) = lookup("PIVOTLAB_TRADE_LEDGER").filter(|s| !s.trim().is_empty()) {
            self.files.trade_ledger = PathBuf::from(raw.trim());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(self.account.account_size > 0.0) {
            return invalid(format!(
                "account.account_size must be positive, got {}",
                self.account.account_size
            ));
        }
        if !(self.account.risk_per_trade > 0.0 && self.account.risk_per_trade <= 1.0) {
            return invalid(format!(
                "account.risk_per_trade must be in (0, 1], got {}",
                self.account.risk_per_trade
            ));
        }
        self.entry.validate().map_err(ConfigError::Invalid)?;
        self.ladder.validate().map_err(ConfigError::Invalid)?;

        let open = self.live.open_time()?;
        let close = self.live.close_time()?;
        if open >= close {
            return invalid(format!("market_open {open} is not before market_close {close}"));
        }
        if self.live.check_interval_secs == 0 {
            return invalid("live.check_interval_secs must be at least 1".into());
        }
        if self.backtest.max_iterations == 0 {
            return invalid("backtest.max_iterations must be at least 1".into());
        }
        if let (Some(start), Some(end)) = (self.backtest.start, self.backtest.end) {
            if start > end {
                return invalid(format!("backtest.start {start} is after backtest.end {end}"));
            }
        }
        if self.data.max_concurrent_fetches == 0 {
            return invalid("data.max_concurrent_fetches must be at least 1".into());
        }
        Ok(())
    }
}
