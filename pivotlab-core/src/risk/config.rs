//! Tunable thresholds for entry validation and the risk ladder.
//!
//! Defaults are the graduated live values. Every field deserializes with a
//! default so a TOML file only needs the values it changes.

use serde::{Deserialize, Serialize};

use crate::domain::ProfitLevel;

/// Entry filters and initial stop derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    pub atr_period: usize,
    /// Widest allowed stop distance, in ATRs.
    pub max_stop_atr_multiple: f64,
    /// Candidate stop = entry-day low × `stop_buffer`.
    pub stop_buffer: f64,
    pub min_price: f64,
    pub max_price: f64,
    /// Entry-day volume must be at least this multiple of the trailing average.
    pub min_volume_ratio: f64,
    pub volume_lookback: usize,
    pub trend_ma_period: usize,
    /// Reject when the close sits further than this below the day's high,
    /// as a fraction of the range. `None` disables the filter.
    pub weak_close_threshold: Option<f64>,
    /// Size to the risk budget; when false the candidate's share count is
    /// kept and only clamped to what cash can buy.
    pub resize_to_risk: bool,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            max_stop_atr_multiple: 2.0,
            stop_buffer: 0.98,
            min_price: 2.0,
            max_price: 200.0,
            min_volume_ratio: 1.2,
            volume_lookback: 20,
            trend_ma_period: 20,
            weak_close_threshold: None,
            resize_to_risk: true,
        }
    }
}

impl EntryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.atr_period == 0 {
            return Err("entry.atr_period must be at least 1".into());
        }
        if !(self.max_stop_atr_multiple > 0.0) {
            return Err("entry.max_stop_atr_multiple must be positive".into());
        }
        if !(self.stop_buffer > 0.0 && self.stop_buffer < 1.0) {
            return Err("entry.stop_buffer must be in (0, 1)".into());
        }
        if !(self.min_price >= 0.0 && self.min_price < self.max_price) {
            return Err(format!(
                "entry price band is inverted: min {} max {}",
                self.min_price, self.max_price
            ));
        }
        if self.min_volume_ratio < 0.0 {
            return Err("entry.min_volume_ratio must not be negative".into());
        }
        if let Some(t) = self.weak_close_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err("entry.weak_close_threshold must be in [0, 1]".into());
            }
        }
        Ok(())
    }
}

/// One rung of the graduated profit ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitLevelConfig {
    /// Fires once the close is this many R above entry.
    pub r_multiple: f64,
    /// Fraction of the initial share count sold at this level.
    pub fraction: f64,
    /// Stop is raised to `entry + lock_r × initial_risk`.
    pub lock_r: f64,
    /// The lock only applies once the position has been held this many days.
    #[serde(default)]
    pub lock_min_days: u32,
}

/// A trailing-stop tier: above `min_gain` the stop trails by `band`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingTier {
    pub min_gain: f64,
    pub band: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    pub breakeven_trigger_pct: f64,
    pub breakeven_min_days: u32,

    pub no_follow_through_days: u32,
    pub no_follow_through_min_r: f64,
    /// Stop tightens to `entry - initial_risk × this`.
    pub no_follow_through_risk_fraction: f64,

    pub strong_ep_gain: f64,
    pub strong_ep_max_days: u32,
    pub strong_ep_fraction: f64,

    pub level1: ProfitLevelConfig,
    pub level2: ProfitLevelConfig,
    pub level3: ProfitLevelConfig,

    pub trailing_tiers: Vec<TrailingTier>,
    pub trailing_ma_period: usize,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            breakeven_trigger_pct: 0.02,
            breakeven_min_days: 2,
            no_follow_through_days: 8,
            no_follow_through_min_r: 0.5,
            no_follow_through_risk_fraction: 0.3,
            strong_ep_gain: 0.15,
            strong_ep_max_days: 3,
            strong_ep_fraction: 0.30,
            level1: ProfitLevelConfig {
                r_multiple: 1.5,
                fraction: 0.25,
                lock_r: 0.0,
                lock_min_days: 2,
            },
            level2: ProfitLevelConfig {
                r_multiple: 3.0,
                fraction: 0.25,
                lock_r: 1.0,
                lock_min_days: 0,
            },
            level3: ProfitLevelConfig {
                r_multiple: 5.0,
                fraction: 0.25,
                lock_r: 2.0,
                lock_min_days: 0,
            },
            trailing_tiers: vec![
                TrailingTier {
                    min_gain: 0.20,
                    band: 0.06,
                },
                TrailingTier {
                    min_gain: 0.10,
                    band: 0.05,
                },
                TrailingTier {
                    min_gain: 0.05,
                    band: 0.04,
                },
            ],
            trailing_ma_period: 20,
        }
    }
}

impl LadderConfig {
    pub fn level(&self, level: ProfitLevel) -> &ProfitLevelConfig {
        match level {
            ProfitLevel::L1 => &self.level1,
            ProfitLevel::L2 => &self.level2,
            ProfitLevel::L3 => &self.level3,
        }
    }

    /// The tier with the highest `min_gain` strictly below `gain`.
    pub fn tier_for(&self, gain: f64) -> Option<&TrailingTier> {
        self.trailing_tiers
            .iter()
            .filter(|t| gain > t.min_gain)
            .max_by(|a, b| a.min_gain.total_cmp(&b.min_gain))
    }

    pub fn validate(&self) -> Result<(), String> {
        let fraction_ok = |f: f64| f > 0.0 && f <= 1.0;

        if !fraction_ok(self.strong_ep_fraction) {
            return Err("ladder.strong_ep_fraction must be in (0, 1]".into());
        }
        if !(0.0..=1.0).contains(&self.no_follow_through_risk_fraction) {
            return Err("ladder.no_follow_through_risk_fraction must be in [0, 1]".into());
        }

        let mut planned = 0.0;
        let mut prev_r = 0.0;
        for level in ProfitLevel::ALL {
            let cfg = self.level(level);
            if !fraction_ok(cfg.fraction) {
                return Err(format!("ladder.level{} fraction must be in (0, 1]", level.number()));
            }
            if !(cfg.r_multiple > prev_r) {
                return Err(format!(
                    "ladder profit levels must ascend: level{} at {}R after {}R",
                    level.number(),
                    cfg.r_multiple,
                    prev_r
                ));
            }
            prev_r = cfg.r_multiple;
            planned += cfg.fraction;
        }
        if planned > 1.0 + 1e-9 {
            return Err(format!("ladder level fractions sum to {planned:.2}, above 1"));
        }

        for tier in &self.trailing_tiers {
            if !(tier.band > 0.0 && tier.band < 1.0) {
                return Err(format!("trailing band {} must be in (0, 1)", tier.band));
            }
        }
        if self.trailing_ma_period == 0 {
            return Err("ladder.trailing_ma_period must be at least 1".into());
        }
        Ok(())
    }
}
