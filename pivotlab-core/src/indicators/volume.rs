//! Average volume of the bars strictly before each index.
//!
//! Used by the entry filter to compare the entry-day volume against the
//! trailing norm, so the entry day itself is excluded from its own baseline.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct AverageVolume {
    period: usize,
    name: String,
}

impl AverageVolume {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("avg_volume_{period}"),
        }
    }
}

impl Indicator for AverageVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        (0..bars.len())
            .map(|i| self.value_at(bars, i).unwrap_or(f64::NAN))
            .collect()
    }

    fn value_at(&self, bars: &[Bar], index: usize) -> Option<f64> {
        if index >= bars.len() || index < self.period {
            return None;
        }
        let total: u64 = bars[index - self.period..index].iter().map(|b| b.volume).sum();
        Some(total as f64 / self.period as f64)
    }
}
