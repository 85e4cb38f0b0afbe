//! Exit recorder: turns an exit decision into a ledger row and credits cash.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{Position, ProfitLevel, TradeResult};
use crate::ledger::AccountLedger;

/// Why shares left a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    /// Stop-out after profit was already banked.
    TrailingStop,
    TrailingBand { band: f64 },
    ForceClose,
    StrongEp { gain: f64 },
    ProfitLevel { level: ProfitLevel, r: f64 },
}

impl ExitReason {
    /// Ledger text for this reason.
    pub fn describe(&self) -> String {
        match self {
            ExitReason::StopLoss => "Stop Loss Hit".to_string(),
            ExitReason::TrailingStop => "Trailing Stop Hit (Profit Protected)".to_string(),
            ExitReason::TrailingBand { band } => {
                format!("Closed below trailing band ({:.0}% below MA)", band * 100.0)
            }
            ExitReason::ForceClose => "Force closed - end of data".to_string(),
            ExitReason::StrongEp { gain } => {
                format!("Strong EP at {:.1}% gain", gain * 100.0)
            }
            ExitReason::ProfitLevel { level, r } => {
                format!("Profit Level {} at {:.2}R", level.number(), r)
            }
        }
    }

    /// Whether this reason closes the whole position.
    pub fn is_full(&self) -> bool {
        matches!(
            self,
            ExitReason::StopLoss
                | ExitReason::TrailingStop
                | ExitReason::TrailingBand { .. }
                | ExitReason::ForceClose
        )
    }
}

/// Outcome of recording one exit.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedExit {
    pub trade: TradeResult,
    /// No shares remain; the position must leave the active set.
    pub closed: bool,
}

/// Record `shares` leaving `position` at `price`.
///
/// A full-exit reason sells everything that remains. Partial exits reduce
/// `shares` and add to `cumulative_profit`; a partial that empties the
/// position also closes it.
pub fn record_exit(
    position: &mut Position,
    shares: u64,
    price: f64,
    date: NaiveDate,
    reason: &ExitReason,
    account: &mut AccountLedger,
) -> RecordedExit {
    let sold = if reason.is_full() {
        position.shares
    } else {
        shares.min(position.shares)
    };
    let profit_loss = (price - position.entry_price) * sold as f64;
    let prior_profit = position.cumulative_profit;

    account.credit(sold as f64 * price);
    position.shares -= sold;
    let closed = position.shares == 0;

    let (exit_reason, is_winner) = if closed {
        let mut text = reason.describe();
        if prior_profit > 0.0 {
            text.push_str(&format!(" (Previous partial profits: ${prior_profit:.2})"));
        }
        (text, profit_loss + prior_profit > 0.0)
    } else {
        position.cumulative_profit += profit_loss;
        (reason.describe(), profit_loss > 0.0)
    };

    let trade = TradeResult {
        symbol: position.symbol.clone(),
        entry_price: position.entry_price,
        exit_price: price,
        shares: sold,
        initial_risk: position.initial_risk,
        profit_loss,
        risk_reward: position.r_multiple(price),
        entry_date: position.purchase_date,
        exit_date: date,
        exit_reason,
        is_winner,
        account_size: account.cash(),
    };

    info!(
        symbol = %trade.symbol,
        %date,
        shares = sold,
        price,
        profit_loss,
        r = trade.risk_reward,
        remaining = position.shares,
        closed,
        reason = %trade.exit_reason,
        "exit recorded"
    );

    RecordedExit { trade, closed }
}
