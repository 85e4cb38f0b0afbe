//! Deterministic synthetic bars for tests, benchmarks and offline demos.
//!
//! Same seed, same series. Weekends are skipped so the calendar looks like a
//! trading calendar.

use crate::domain::Bar;
use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct SyntheticParams {
    pub start_price: f64,
    /// Mean daily return.
    pub drift: f64,
    /// Half-width of the uniform daily return around `drift`.
    pub volatility: f64,
    pub base_volume: u64,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            start_price: 20.0,
            drift: 0.0,
            volatility: 0.03,
            base_volume: 1_000_000,
        }
    }
}

/// Seed derived from the symbol name so every symbol gets its own series.
pub fn seed_for(symbol: &str) -> u64 {
    let hash = blake3::hash(symbol.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Random-walk weekday bars from `start` through `end`.
pub fn random_walk(seed: u64, start: NaiveDate, end: NaiveDate, params: &SyntheticParams) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = Vec::new();
    let mut price = params.start_price;
    let vol = params.volatility.abs().max(f64::EPSILON);

    for date in start.iter_days().take_while(|d| *d <= end) {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }

        let daily_return = params.drift + rng.gen_range(-vol..vol);
        let open = price;
        let close = (price * (1.0 + daily_return)).max(0.01);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        let volume = (params.base_volume as f64 * rng.gen_range(0.5..1.5)) as u64;

        bars.push(Bar {
            date,
            open,
            high,
            low,
            close,
            volume,
        });
        price = close;
    }

    bars
}
