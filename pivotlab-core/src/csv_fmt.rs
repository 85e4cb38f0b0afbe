//! Serde helpers for the CSV files shared with other tools.
//!
//! Money columns are written rounded to cents. Share columns accept the
//! `"75.00"` form older ledgers wrote.

use serde::{Deserialize, Deserializer, Serializer};

/// Round to two decimals before serializing.
pub fn cents<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_cents(*value))
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Deserialize a share count written either as an integer or a float.
pub fn whole_shares<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() || raw < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "invalid share count: {raw}"
        )));
    }
    Ok(raw.round() as u64)
}

/// Parse a price cell, tolerating a leading `$` and surrounding whitespace.
pub fn parse_price(cell: &str) -> Option<f64> {
    let trimmed = cell.trim().trim_start_matches('$').trim();
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a share cell (`"100"`, `"100.00"`, `"$100"`).
pub fn parse_shares(cell: &str) -> Option<u64> {
    parse_price(cell)
        .filter(|v| *v >= 0.0)
        .map(|v| v.round() as u64)
}
