//! Indicators used by the entry filters and the trailing stop.
//!
//! Every indicator is a pure function of bar history: the value at index `t`
//! never reads bars after `t`.

pub mod atr;
pub mod sma;
pub mod volume;

pub use atr::{true_range, Atr};
pub use sma::Sma;
pub use volume::AverageVolume;

use crate::domain::Bar;

/// Trait for indicators.
///
/// `compute` produces a series the same length as `bars`, NaN during warmup.
/// `value_at` answers a single point without building the whole series.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "sma_20", "atr_14").
    fn name(&self) -> &str;

    /// Number of bars needed before the indicator produces valid output.
    fn lookback(&self) -> usize;

    /// Compute the indicator for the entire bar series.
    fn compute(&self, bars: &[Bar]) -> Vec<f64>;

    /// Value at `index`, or `None` during warmup or past the end of `bars`.
    fn value_at(&self, bars: &[Bar], index: usize) -> Option<f64> {
        let window = bars.get(..=index)?;
        self.compute(window)
            .last()
            .copied()
            .filter(|v| v.is_finite())
    }
}

/// Create synthetic bars from close prices for testing.
///
/// open = prev_close (or close for the first bar), high/low one dollar
/// outside the body, volume 1000, one calendar day apart.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                date: base_date + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000,
            }
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
