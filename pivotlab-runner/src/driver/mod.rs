//! Clock drivers: decide *when* the session evaluates, never *what*.
//!
//! - `BacktestDriver` walks a historical calendar synchronously.
//! - `LiveDriver` follows wall-clock market hours and sleeps between polls.
//!
//! Both call the same `Session` methods, so identical bar sequences yield
//! identical decisions.

pub mod backtest;
pub mod live;

pub use backtest::BacktestDriver;
pub use live::{Clock, LiveDriver, ManualClock, MarketSchedule, SessionPhase, SystemClock};

use chrono::NaiveDate;
use pivotlab_core::PersistenceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::session::{DayReport, EntryReport, Session};
use crate::stats::TradeStats;

/// Errors that stop a driver.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Current schema version for the persisted run summary.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// What a driver run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub mode: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub days_processed: usize,
    pub entries_opened: usize,
    pub entries_rejected: usize,
    pub exits: usize,
    /// Symbols closed because their data ran out.
    pub force_closed: Vec<String>,
    /// Symbols still open when the run ended.
    pub open_positions: Vec<String>,
    pub final_cash: f64,
    /// Trades recorded during this run.
    pub stats: TradeStats,
}

/// Something that drives a `Session` through time.
pub trait ClockDriver {
    fn name(&self) -> &'static str;

    fn run(&mut self, session: &mut Session) -> Result<RunSummary, RunError>;
}

/// Running counts a driver keeps while it works.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    days: usize,
    opened: usize,
    rejected: usize,
    exits: usize,
    force_closed: Vec<String>,
    last_day: Option<NaiveDate>,
}

impl Tally {
    pub(crate) fn entries(&mut self, report: &EntryReport) {
        self.opened += report.opened.len();
        self.rejected += report.rejected.len();
    }

    /// Repeated passes over the same date count as one day.
    pub(crate) fn day(&mut self, report: &DayReport) {
        if report.date.is_none() || report.date != self.last_day {
            self.days += 1;
            self.last_day = report.date;
        }
        self.exits += report.exits.len();
        if let Some(date) = report.date {
            self.start = Some(self.start.map_or(date, |s| s.min(date)));
            self.end = Some(self.end.map_or(date, |e| e.max(date)));
        }
    }

    pub(crate) fn forced(&mut self, symbol: String) {
        self.exits += 1;
        self.force_closed.push(symbol);
    }

    pub(crate) fn finish(self, mode: &str, session: &Session) -> RunSummary {
        RunSummary {
            schema_version: SCHEMA_VERSION,
            mode: mode.to_string(),
            start: self.start,
            end: self.end,
            days_processed: self.days,
            entries_opened: self.opened,
            entries_rejected: self.rejected,
            exits: self.exits,
            force_closed: self.force_closed,
            open_positions: session.store().symbols(),
            final_cash: session.account().cash(),
            stats: TradeStats::compute(
                session.completed_trades(),
                session.account().starting(),
            ),
        }
    }
}
