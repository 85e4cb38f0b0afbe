//! Entry initializer: validates a candidate against its history and opens a
//! sized position with an ATR-bounded initial stop.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info};

use super::config::EntryConfig;
use crate::domain::{index_of, Bar, Position};
use crate::indicators::{Atr, AverageVolume, Indicator, Sma};
use crate::ledger::AccountLedger;

/// A position waiting to be opened, as listed on the watchlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub purchase_date: NaiveDate,
    pub entry_price: f64,
    /// Overrides the entry-day-low stop when strictly between 0 and entry.
    pub stop_loss: Option<f64>,
    pub shares: Option<u64>,
}

/// What the account can put at risk on this entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskBudget {
    /// Cash plus the marked value of open positions.
    pub account_value: f64,
    pub risk_per_trade: f64,
    pub available_cash: f64,
}

impl RiskBudget {
    /// Dollars the trade may lose if stopped at its initial stop.
    pub fn dollars(&self) -> f64 {
        self.account_value * self.risk_per_trade
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntryRejection {
    #[error("{symbol}: history unavailable ({reason})")]
    DataUnavailable { symbol: String, reason: String },

    #[error("{symbol}: no bar on purchase date {date}")]
    MissingEntryBar { symbol: String, date: NaiveDate },

    #[error("{symbol}: price ${price:.2} outside ${min:.2}-${max:.2}")]
    PriceOutOfBand {
        symbol: String,
        price: f64,
        min: f64,
        max: f64,
    },

    #[error("{symbol}: volume {volume} below {ratio:.2}x average {average:.0}")]
    InsufficientVolume {
        symbol: String,
        volume: u64,
        average: f64,
        ratio: f64,
    },

    #[error("{symbol}: close ${close:.2} below {period}-day MA ${ma:.2}")]
    BelowTrend {
        symbol: String,
        close: f64,
        ma: f64,
        period: usize,
    },

    #[error("{symbol}: weak close, {from_high:.0}% of range below the high")]
    WeakClose { symbol: String, from_high: f64 },

    #[error("{symbol}: invalid risk, entry ${entry:.2} stop ${stop:.2}")]
    InvalidRisk { symbol: String, entry: f64, stop: f64 },

    #[error("{symbol}: cannot afford one share at ${entry:.2} with ${cash:.2} cash")]
    Unaffordable { symbol: String, entry: f64, cash: f64 },
}

/// A validated entry, before cash is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPlan {
    pub position: Position,
    pub atr: f64,
    /// The candidate stop was tightened to the ATR limit.
    pub stop_capped: bool,
    /// Shares were cut to what cash can buy.
    pub cash_limited: bool,
}

impl EntryPlan {
    pub fn cost(&self) -> f64 {
        self.position.shares as f64 * self.position.entry_price
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntryInitializer {
    config: EntryConfig,
}

impl EntryInitializer {
    pub fn new(config: EntryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EntryConfig {
        &self.config
    }

    /// Validate `candidate` against `history` and size it to `budget`.
    ///
    /// `history` must be normalized (ascending, one bar per date) and include
    /// the purchase date.
    pub fn plan(
        &self,
        candidate: &Candidate,
        history: &[Bar],
        budget: &RiskBudget,
    ) -> Result<EntryPlan, EntryRejection> {
        let cfg = &self.config;
        let symbol = candidate.symbol.clone();
        let entry = candidate.entry_price;

        let idx = index_of(history, candidate.purchase_date).ok_or_else(|| {
            EntryRejection::MissingEntryBar {
                symbol: symbol.clone(),
                date: candidate.purchase_date,
            }
        })?;
        if idx + 1 < cfg.atr_period {
            return Err(EntryRejection::DataUnavailable {
                symbol,
                reason: format!("need {} bars, have {}", cfg.atr_period, idx + 1),
            });
        }
        let bar = &history[idx];

        if bar.close < cfg.min_price || bar.close > cfg.max_price {
            return Err(EntryRejection::PriceOutOfBand {
                symbol,
                price: bar.close,
                min: cfg.min_price,
                max: cfg.max_price,
            });
        }

        if let Some(average) = AverageVolume::new(cfg.volume_lookback)
            .value_at(history, idx)
            .filter(|avg| *avg > 0.0)
        {
            if (bar.volume as f64) < average * cfg.min_volume_ratio {
                return Err(EntryRejection::InsufficientVolume {
                    symbol,
                    volume: bar.volume,
                    average,
                    ratio: cfg.min_volume_ratio,
                });
            }
        }

        if let Some(ma) = Sma::new(cfg.trend_ma_period).value_at(history, idx) {
            if bar.close < ma {
                return Err(EntryRejection::BelowTrend {
                    symbol,
                    close: bar.close,
                    ma,
                    period: cfg.trend_ma_period,
                });
            }
        }

        if let Some(threshold) = cfg.weak_close_threshold {
            let from_high = bar.close_from_high();
            if from_high > threshold {
                return Err(EntryRejection::WeakClose {
                    symbol,
                    from_high: from_high * 100.0,
                });
            }
        }

        let atr = Atr::new(cfg.atr_period)
            .value_at(history, idx)
            .ok_or_else(|| EntryRejection::DataUnavailable {
                symbol: symbol.clone(),
                reason: "ATR unavailable".into(),
            })?;

        let mut stop = match candidate.stop_loss {
            Some(s) if s > 0.0 && s < entry => s,
            _ => bar.low * cfg.stop_buffer,
        };
        let max_distance = atr * cfg.max_stop_atr_multiple;
        let stop_capped = entry - stop > max_distance;
        if stop_capped {
            debug!(symbol = %symbol, atr, from = stop, to = entry - max_distance, "stop capped by ATR");
            stop = entry - max_distance;
        }

        if !(entry > 0.0 && stop > 0.0 && entry - stop > 0.0) {
            return Err(EntryRejection::InvalidRisk { symbol, entry, stop });
        }
        let risk = entry - stop;

        let wanted = match candidate.shares {
            Some(shares) if !cfg.resize_to_risk => shares,
            _ => (budget.dollars() / risk).round().max(0.0) as u64,
        };
        let affordable = (budget.available_cash / entry + 1e-9).floor().max(0.0) as u64;
        let shares = wanted.min(affordable);
        if shares == 0 {
            return Err(EntryRejection::Unaffordable {
                symbol,
                entry,
                cash: budget.available_cash,
            });
        }

        let position = Position::open(
            symbol,
            candidate.purchase_date,
            entry,
            stop,
            shares,
            bar.low,
            bar.high,
        );
        Ok(EntryPlan {
            position,
            atr,
            stop_capped,
            cash_limited: shares < wanted,
        })
    }

    /// Plan the entry and debit its cost from `account`.
    pub fn open(
        &self,
        candidate: &Candidate,
        history: &[Bar],
        budget: &RiskBudget,
        account: &mut AccountLedger,
    ) -> Result<EntryPlan, EntryRejection> {
        let plan = self.plan(candidate, history, budget)?;
        account.debit(plan.cost());
        let pos = &plan.position;
        info!(
            symbol = %pos.symbol,
            date = %pos.purchase_date,
            entry = pos.entry_price,
            stop = pos.stop_loss,
            risk = pos.initial_risk,
            atr = plan.atr,
            shares = pos.shares,
            cost = plan.cost(),
            cash = account.cash(),
            "position opened"
        );
        Ok(plan)
    }
}
