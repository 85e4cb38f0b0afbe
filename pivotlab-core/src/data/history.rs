//! Per-symbol history cache in front of a provider.
//!
//! Daily bars for a past date never change, so a fetched window is reused as
//! long as it covers the requested range. The live driver invalidates a
//! symbol once the official daily bar for today is expected.

use super::provider::{DataError, MarketDataProvider};
use crate::domain::{normalize_bars, Bar};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    from: NaiveDate,
    to: NaiveDate,
    bars: Arc<Vec<Bar>>,
}

#[derive(Debug, Default)]
pub struct HistoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bars for `symbol` in `[from, to]`, fetching only on a cache miss.
    ///
    /// The lock is not held across the fetch; two threads racing on the same
    /// symbol both fetch and the later insert wins, which is harmless.
    pub fn get_or_fetch(
        &self,
        provider: &dyn MarketDataProvider,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Arc<Vec<Bar>>, DataError> {
        if let Some(entry) = self.lock().get(symbol) {
            if entry.from <= from && entry.to >= to {
                let bars: Vec<Bar> = entry
                    .bars
                    .iter()
                    .filter(|b| b.date >= from && b.date <= to)
                    .cloned()
                    .collect();
                if bars.len() == entry.bars.len() {
                    return Ok(Arc::clone(&entry.bars));
                }
                return Ok(Arc::new(bars));
            }
        }

        debug!(symbol, %from, %to, provider = provider.name(), "fetching history");
        let bars = Arc::new(normalize_bars(provider.daily_bars(symbol, from, to)?));
        self.lock().insert(
            symbol.to_string(),
            Entry {
                from,
                to,
                bars: Arc::clone(&bars),
            },
        );
        Ok(bars)
    }

    pub fn invalidate(&self, symbol: &str) {
        self.lock().remove(symbol);
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
