//! Simple Moving Average (SMA) of closes.
//!
//! Lookback: period - 1 (first valid value at index period-1).

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("sma_{period}"),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let mut result = vec![f64::NAN; bars.len()];
        let mut sum = 0.0;
        for (i, bar) in bars.iter().enumerate() {
            sum += bar.close;
            if i >= self.period {
                sum -= bars[i - self.period].close;
            }
            if i + 1 >= self.period {
                result[i] = sum / self.period as f64;
            }
        }
        result
    }

    fn value_at(&self, bars: &[Bar], index: usize) -> Option<f64> {
        if index >= bars.len() || index + 1 < self.period {
            return None;
        }
        let window = &bars[index + 1 - self.period..=index];
        let mean = window.iter().map(|b| b.close).sum::<f64>() / self.period as f64;
        mean.is_finite().then_some(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn sma_5_basic() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]);
        let result = Sma::new(5).compute(&bars);

        assert_eq!(result.len(), 7);
        assert!(result[..4].iter().all(|v| v.is_nan()));
        assert_approx(result[4], 12.0, DEFAULT_EPSILON);
        assert_approx(result[6], 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn value_at_matches_series() {
        let bars = make_bars(&[5.0, 7.0, 9.0, 4.0, 8.0, 6.0]);
        let sma = Sma::new(3);
        let series = sma.compute(&bars);
        for i in 2..bars.len() {
            assert_approx(sma.value_at(&bars, i).unwrap(), series[i], DEFAULT_EPSILON);
        }
        assert!(sma.value_at(&bars, 1).is_none());
        assert!(sma.value_at(&bars, 6).is_none());
    }

    #[test]
    fn value_at_ignores_later_bars() {
        let bars = make_bars(&[10.0, 10.0, 10.0, 50.0]);
        let sma = Sma::new(3);
        assert_approx(sma.value_at(&bars, 2).unwrap(), 10.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_lookback() {
        assert_eq!(Sma::new(20).lookback(), 19);
        assert_eq!(Sma::new(1).lookback(), 0);
    }
}
