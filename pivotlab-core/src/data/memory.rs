//! In-memory provider backed by pre-loaded bars.
//!
//! Backtests load it from the Parquet cache or a directory of `{SYMBOL}.csv`
//! files; tests fill it directly. Latest prices default to the last close and
//! can be pinned with [`MemoryProvider::set_price`].

use super::cache::ParquetCache;
use super::provider::{DataError, MarketDataProvider};
use crate::domain::{normalize_bars, Bar};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Store {
    bars: HashMap<String, Vec<Bar>>,
    prices: HashMap<String, f64>,
}

#[derive(Debug, Default)]
pub struct MemoryProvider {
    store: RwLock<Store>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the history for `symbol`.
    pub fn insert(&self, symbol: &str, bars: Vec<Bar>) {
        self.write()
            .bars
            .insert(symbol.to_string(), normalize_bars(bars));
    }

    /// Append one bar, replacing any bar already on that date.
    pub fn push_bar(&self, symbol: &str, bar: Bar) {
        let mut store = self.write();
        let series = store.bars.entry(symbol.to_string()).or_default();
        series.push(bar);
        let normalized = normalize_bars(std::mem::take(series));
        *series = normalized;
    }

    /// Pin the latest price for `symbol`.
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.write().prices.insert(symbol.to_string(), price);
    }

    pub fn clear_price(&self, symbol: &str) {
        self.write().prices.remove(symbol);
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.read().bars.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// All bars held for `symbol`.
    pub fn history(&self, symbol: &str) -> Option<Vec<Bar>> {
        self.read().bars.get(symbol).cloned()
    }

    /// Load the given symbols from the Parquet cache.
    ///
    /// Symbols without cached data are skipped with a warning.
    pub fn from_cache(cache: &ParquetCache, symbols: &[&str]) -> Self {
        let provider = Self::new();
        for symbol in symbols {
            match cache.load(symbol) {
                Ok(bars) => {
                    debug!(symbol, bars = bars.len(), "loaded cached history");
                    provider.insert(symbol, bars);
                }
                Err(e) => warn!(symbol, error = %e, "no usable cached history"),
            }
        }
        provider
    }

    /// Load every `{SYMBOL}.csv` file in `dir`.
    ///
    /// Files need `date,open,high,low,close,volume` headers (any order, any
    /// case); extra columns are ignored.
    pub fn load_csv_dir(dir: &Path) -> Result<Self, DataError> {
        let provider = Self::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| DataError::CacheError(format!("read dir {}: {e}", dir.display())))?;

        for entry in entries {
            let entry = entry.map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(symbol) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bars = read_bar_csv(&path)?;
            debug!(symbol, bars = bars.len(), "loaded csv history");
            provider.insert(&symbol.to_uppercase(), bars);
        }

        Ok(provider)
    }
}

fn read_bar_csv(path: &Path) -> Result<Vec<Bar>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| DataError::CacheError(format!("open {}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| DataError::ValidationError(format!("{}: {e}", path.display())))?
        .clone();
    let column = |name: &str| -> Result<usize, DataError> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                DataError::ValidationError(format!("{}: missing column '{name}'", path.display()))
            })
    };
    let (date_i, open_i, high_i, low_i, close_i, vol_i) = (
        column("date")?,
        column("open")?,
        column("high")?,
        column("low")?,
        column("close")?,
        column("volume")?,
    );

    let mut bars = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| DataError::ValidationError(format!("{}: {e}", path.display())))?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let bad_row = || {
            DataError::ValidationError(format!("{}: malformed row {}", path.display(), line + 2))
        };

        let date = NaiveDate::parse_from_str(field(date_i), "%Y-%m-%d").map_err(|_| bad_row())?;
        let num = |i: usize| field(i).parse::<f64>().map_err(|_| bad_row());
        bars.push(Bar {
            date,
            open: num(open_i)?,
            high: num(high_i)?,
            low: num(low_i)?,
            close: num(close_i)?,
            volume: num(vol_i)?.max(0.0).round() as u64,
        });
    }

    Ok(bars)
}

impl MarketDataProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn daily_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Bar>, DataError> {
        let store = self.read();
        let bars = store.bars.get(symbol).ok_or_else(|| DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        })?;
        Ok(bars
            .iter()
            .filter(|b| b.date >= from && b.date <= to)
            .cloned()
            .collect())
    }

    fn current_price(&self, symbol: &str) -> Result<f64, DataError> {
        let store = self.read();
        if let Some(price) = store.prices.get(symbol) {
            return Ok(*price);
        }
        store
            .bars
            .get(symbol)
            .and_then(|bars| bars.last())
            .map(|b| b.close)
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })
    }
}
