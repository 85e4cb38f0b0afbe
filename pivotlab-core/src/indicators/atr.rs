//! Average True Range (ATR), simple-mean variant.
//!
//! TR[t] = max(high-low, |high-prev_close|, |low-prev_close|), defined from the
//! second bar on. ATR at t is the plain mean of the true ranges inside the
//! last `period` bars ending at t; the very first bar of a series contributes
//! no true range.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    name: String,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("atr_{period}"),
        }
    }
}

/// True range series. TR[0] is NaN: there is no previous close.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut tr = vec![f64::NAN; bars.len()];
    for i in 1..bars.len() {
        let (h, l, pc) = (bars[i].high, bars[i].low, bars[i - 1].close);
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let tr = true_range(bars);
        (0..bars.len())
            .map(|i| {
                if i + 1 < self.period {
                    return f64::NAN;
                }
                let window: Vec<f64> = tr[i + 1 - self.period..=i]
                    .iter()
                    .copied()
                    .filter(|v| !v.is_nan())
                    .collect();
                if window.is_empty() {
                    f64::NAN
                } else {
                    window.iter().sum::<f64>() / window.len() as f64
                }
            })
            .collect()
    }
}
