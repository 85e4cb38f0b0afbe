//! pivotlab runner: session orchestration, clock drivers, configuration.
//!
//! This crate builds on `pivotlab-core` to provide:
//! - TOML + environment configuration
//! - The `Session`, sole owner of positions, ledgers and the watchlist
//! - Live and backtest clock drivers over one shared risk ladder
//! - Intraday alerts, trade statistics and run artifacts

pub mod alerts;
pub mod config;
pub mod driver;
pub mod export;
pub mod session;
pub mod stats;

pub use alerts::{Alert, AlertKind, AlertLog};
pub use config::{AppConfig, BacktestConfig, ConfigError, LiveConfig};
pub use driver::{
    BacktestDriver, ClockDriver, LiveDriver, ManualClock, RunError, RunSummary, SystemClock,
};
pub use session::{DayReport, EntryReport, PreCloseLine, Session, SessionFiles};
pub use stats::TradeStats;
