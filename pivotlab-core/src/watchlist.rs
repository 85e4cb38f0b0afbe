//! Watchlist CSV: the persisted row per pending or open position.
//!
//! The file is a write-through copy of the position store. Columns are
//! located by header name so hand-edited files with extra columns keep
//! working; unknown columns are carried through every rewrite untouched.
//! Each rewrite goes to a temporary file that replaces the original.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::csv_fmt::{parse_price, parse_shares};
use crate::domain::{Position, PositionStatus};
use crate::error::PersistenceError;
use crate::risk::Candidate;

const SYMBOL: &[&str] = &["stock_symbol", "symbol", "ticker"];
const ENTRY_PRICE: &[&str] = &["entry_price"];
const STOP_LOSS: &[&str] = &["stop_loss_price", "stop_loss"];
const SHARES: &[&str] = &["shares"];
const DATE: &[&str] = &["date", "purchase_date"];
const STATUS: &[&str] = &["status"];
const DAYS_HELD: &[&str] = &["days_held"];

const INITIAL_STOP: &[&str] = &["initial_stop_loss"];
const INITIAL_SHARES: &[&str] = &["initial_shares"];
const CUMULATIVE_PROFIT: &[&str] = &["cumulative_profit"];
const HIGHEST_PRICE: &[&str] = &["highest_price"];
const LAST_CHECK: &[&str] = &["last_check_date"];
const TRAILING: &[&str] = &["trailing"];
const EP_DAY_LOW: &[&str] = &["ep_day_low"];
const EP_DAY_HIGH: &[&str] = &["ep_day_high"];

/// One parsed watchlist row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WatchlistRow {
    pub symbol: String,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub shares: Option<u64>,
    pub purchase_date: Option<NaiveDate>,
    /// Raw status cell; empty for a pending candidate.
    pub status_text: String,
    pub status: Option<PositionStatus>,
    pub days_held: u32,

    pub initial_stop_loss: Option<f64>,
    pub initial_shares: Option<u64>,
    pub cumulative_profit: Option<f64>,
    pub highest_price: Option<f64>,
    pub last_check_date: Option<NaiveDate>,
    pub trailing: Option<bool>,
    pub ep_day_low: Option<f64>,
    pub ep_day_high: Option<f64>,
}

impl WatchlistRow {
    /// No status yet: the row is waiting to be opened.
    pub fn is_pending(&self) -> bool {
        self.status_text.trim().is_empty()
    }

    /// Pending row as an entry candidate. Rows without an entry price are
    /// skipped.
    pub fn to_candidate(&self, default_date: NaiveDate) -> Option<Candidate> {
        if !self.is_pending() {
            return None;
        }
        let entry_price = self.entry_price.filter(|p| *p > 0.0)?;
        Some(Candidate {
            symbol: self.symbol.clone(),
            purchase_date: self.purchase_date.unwrap_or(default_date),
            entry_price,
            stop_loss: self.stop_loss.filter(|s| *s > 0.0),
            shares: self.shares.filter(|s| *s > 0),
        })
    }

    /// Rebuild an open position from a row with a status.
    ///
    /// Profit flags follow from the status. Without an `initial_stop_loss`
    /// column the current stop is taken as the initial one; a row whose
    /// risk cannot be recovered that way is skipped.
    pub fn to_position(&self) -> Option<Position> {
        let status = self.status?;
        let entry = self.entry_price?;
        let stop = self.stop_loss?;
        let shares = self.shares.filter(|s| *s > 0)?;
        let date = self.purchase_date?;
        let initial_stop = self.initial_stop_loss.unwrap_or(stop);
        if entry - initial_stop <= 0.0 {
            return None;
        }

        let mut pos = Position::open(
            self.symbol.clone(),
            date,
            entry,
            initial_stop,
            self.initial_shares.unwrap_or(shares).max(shares),
            self.ep_day_low.unwrap_or(initial_stop),
            self.ep_day_high.unwrap_or(entry),
        );
        pos.stop_loss = stop.max(initial_stop);
        pos.shares = shares;
        pos.days_held = self.days_held;
        pos.last_check_date = self.last_check_date;
        pos.highest_price = self.highest_price.unwrap_or(entry).max(entry);
        pos.cumulative_profit = self.cumulative_profit.unwrap_or(0.0);
        pos.status = status;
        // a strong-EP exit takes the first rung
        pos.profit_taken_l1 = matches!(
            status,
            PositionStatus::MonitoringL1
                | PositionStatus::MonitoringStrongEp
                | PositionStatus::MonitoringL2
                | PositionStatus::MonitoringL3
        );
        pos.profit_taken_l2 = matches!(
            status,
            PositionStatus::MonitoringL2 | PositionStatus::MonitoringL3
        );
        pos.profit_taken_l3 = status == PositionStatus::MonitoringL3;
        pos.strong_ep_taken = status == PositionStatus::MonitoringStrongEp;
        pos.trailing_stop_mode = self
            .trailing
            .unwrap_or(status != PositionStatus::Holding);
        Some(pos)
    }
}

/// Header plus raw records, as read from disk.
#[derive(Debug, Default)]
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn column(&self, names: &[&str]) -> Option<usize> {
        self.headers.iter().position(|h| {
            let h = h.trim();
            names.iter().any(|n| h.eq_ignore_ascii_case(n))
        })
    }

    fn ensure_column(&mut self, names: &[&str]) -> usize {
        if let Some(idx) = self.column(names) {
            return idx;
        }
        self.headers.push(names[0].to_string());
        for row in &mut self.rows {
            row.resize(self.headers.len(), String::new());
        }
        self.headers.len() - 1
    }

    fn cell<'a>(&self, row: &'a [String], names: &[&str]) -> Option<&'a str> {
        self.column(names)
            .and_then(|idx| row.get(idx))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn find(&self, symbol_col: usize, symbol: &str) -> Option<usize> {
        self.rows.iter().position(|row| {
            row.get(symbol_col)
                .is_some_and(|s| s.trim().eq_ignore_ascii_case(symbol))
        })
    }
}

fn parse_date(cell: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(cell, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(cell, "%m/%d/%Y"))
        .ok()
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn price_cell(value: f64) -> String {
    format!("{value:.4}")
}

/// Shortest text that parses back to the same value. Used for the prices
/// initial risk is rebuilt from on resume.
fn exact_cell(value: f64) -> String {
    value.to_string()
}

#[derive(Debug)]
pub struct Watchlist {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Watchlist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time of the file, if it exists.
    pub fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Every row with a symbol. A missing file is an empty watchlist.
    pub fn load(&self) -> Result<Vec<WatchlistRow>, PersistenceError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let table = self.read_table()?;
        if table.headers.is_empty() {
            return Ok(Vec::new());
        }
        if table.column(SYMBOL).is_none() {
            return Err(PersistenceError::MissingColumn {
                path: self.path.clone(),
                column: SYMBOL[0].to_string(),
            });
        }

        let mut rows = Vec::with_capacity(table.rows.len());
        for record in &table.rows {
            let Some(symbol) = table.cell(record, SYMBOL) else {
                continue;
            };
            let status_text = table.cell(record, STATUS).unwrap_or_default().to_string();
            let status = PositionStatus::from_label(&status_text);
            if status.is_none() && !status_text.is_empty() {
                warn!(symbol, status = %status_text, "unrecognized watchlist status");
            }
            rows.push(WatchlistRow {
                symbol: symbol.to_ascii_uppercase(),
                entry_price: table.cell(record, ENTRY_PRICE).and_then(parse_price),
                stop_loss: table.cell(record, STOP_LOSS).and_then(parse_price),
                shares: table.cell(record, SHARES).and_then(parse_shares),
                purchase_date: table.cell(record, DATE).and_then(parse_date),
                status_text,
                status,
                days_held: table
                    .cell(record, DAYS_HELD)
                    .and_then(parse_shares)
                    .map(|d| d as u32)
                    .unwrap_or(0),
                initial_stop_loss: table.cell(record, INITIAL_STOP).and_then(parse_price),
                initial_shares: table.cell(record, INITIAL_SHARES).and_then(parse_shares),
                cumulative_profit: table.cell(record, CUMULATIVE_PROFIT).and_then(parse_price),
                highest_price: table.cell(record, HIGHEST_PRICE).and_then(parse_price),
                last_check_date: table.cell(record, LAST_CHECK).and_then(parse_date),
                trailing: table.cell(record, TRAILING).and_then(parse_bool),
                ep_day_low: table.cell(record, EP_DAY_LOW).and_then(parse_price),
                ep_day_high: table.cell(record, EP_DAY_HIGH).and_then(parse_price),
            });
        }
        Ok(rows)
    }

    /// Write `position` into its row.
    ///
    /// Returns [`PersistenceError::Conflict`] when no row carries the
    /// symbol, which callers treat as a no-op.
    pub fn update(&self, position: &Position) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut table = self.read_table()?;
        let conflict = || PersistenceError::Conflict {
            symbol: position.symbol.clone(),
        };
        let symbol_col = table.column(SYMBOL).ok_or_else(conflict)?;
        let row_idx = table.find(symbol_col, &position.symbol).ok_or_else(conflict)?;

        let cells = [
            (ENTRY_PRICE, exact_cell(position.entry_price)),
            (STOP_LOSS, exact_cell(position.stop_loss)),
            (SHARES, position.shares.to_string()),
            (DATE, position.purchase_date.format("%Y-%m-%d").to_string()),
            (STATUS, position.status.label().to_string()),
            (DAYS_HELD, position.days_held.to_string()),
            (INITIAL_STOP, exact_cell(position.initial_stop_loss)),
            (INITIAL_SHARES, position.initial_shares.to_string()),
            (CUMULATIVE_PROFIT, format!("{:.2}", position.cumulative_profit)),
            (HIGHEST_PRICE, price_cell(position.highest_price)),
            (
                LAST_CHECK,
                position
                    .last_check_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            ),
            (TRAILING, position.trailing_stop_mode.to_string()),
            (EP_DAY_LOW, price_cell(position.ep_day_low)),
            (EP_DAY_HIGH, price_cell(position.ep_day_high)),
        ];
        for (names, value) in cells {
            let col = table.ensure_column(names);
            table.rows[row_idx][col] = value;
        }

        self.write_table(&table)?;
        debug!(symbol = %position.symbol, status = %position.status, stop = position.stop_loss, shares = position.shares, "watchlist row updated");
        Ok(())
    }

    /// Drop the row for `symbol`. Returns whether a row was removed.
    pub fn remove(&self, symbol: &str) -> Result<bool, PersistenceError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut table = self.read_table()?;
        let Some(symbol_col) = table.column(SYMBOL) else {
            return Ok(false);
        };
        let before = table.rows.len();
        table.rows.retain(|row| {
            !row.get(symbol_col)
                .is_some_and(|s| s.trim().eq_ignore_ascii_case(symbol))
        });
        if table.rows.len() == before {
            return Ok(false);
        }
        self.write_table(&table)?;
        debug!(symbol, "watchlist row removed");
        Ok(true)
    }

    fn read_table(&self) -> Result<Table, PersistenceError> {
        if !self.path.exists() {
            return Ok(Table::default());
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| PersistenceError::csv(&self.path, e))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| PersistenceError::csv(&self.path, e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| PersistenceError::csv(&self.path, e))?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len().max(row.len()), String::new());
            rows.push(row);
        }
        Ok(Table { headers, rows })
    }

    fn write_table(&self, table: &Table) -> Result<(), PersistenceError> {
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(&tmp)
            .map_err(|e| PersistenceError::csv(&tmp, e))?;
        writer
            .write_record(&table.headers)
            .map_err(|e| PersistenceError::csv(&tmp, e))?;
        for row in &table.rows {
            writer
                .write_record(row)
                .map_err(|e| PersistenceError::csv(&tmp, e))?;
        }
        writer.flush().map_err(|e| PersistenceError::io(&tmp, e))?;
        drop(writer);

        std::fs::rename(&tmp, &self.path).map_err(|e| PersistenceError::io(&self.path, e))
    }
}
