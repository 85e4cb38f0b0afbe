//! Bar: one trading day of OHLCV data for a symbol.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar.
///
/// Bars carry no symbol: a provider returns them per symbol, and every
/// consumer keys its history by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }

    /// Where the close sits inside the day's range, measured down from the high.
    ///
    /// 0.0 is a close at the high, 1.0 a close at the low. A zero-range bar
    /// reports 0.0.
    pub fn close_from_high(&self) -> f64 {
        let range = self.high - self.low;
        if range <= 0.0 {
            return 0.0;
        }
        (self.high - self.close) / range
    }
}

/// Sort bars ascending by date, drop duplicate dates (last one wins) and
/// discard bars that fail the sanity check.
///
/// Providers promise ascending order; this is applied anyway before any
/// history is used.
pub fn normalize_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.retain(Bar::is_sane);
    bars.sort_by_key(|b| b.date);
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

/// Index of the bar dated exactly `date`, if present.
pub fn index_of(bars: &[Bar], date: NaiveDate) -> Option<usize> {
    bars.binary_search_by_key(&date, |b| b.date).ok()
}

/// Index of the last bar dated on or before `date`.
pub fn last_index_on_or_before(bars: &[Bar], date: NaiveDate) -> Option<usize> {
    match bars.binary_search_by_key(&date, |b| b.date) {
        Ok(i) => Some(i),
        Err(0) => None,
        Err(i) => Some(i - 1),
    }
}
