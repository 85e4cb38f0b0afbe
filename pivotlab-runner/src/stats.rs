//! Trade statistics over ledger rows.
//!
//! Every ledger row counts as a trade, partial exits included, so the
//! numbers match what the ledger file shows.

use std::fmt;

use pivotlab_core::domain::TradeResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub winners: usize,
    pub losers: usize,
    /// Fraction in [0, 1].
    pub win_rate: f64,
    pub avg_winner_r: f64,
    pub avg_loser_r: f64,
    pub total_pnl: f64,
    pub starting_account: f64,
    /// `total_pnl / starting_account`.
    pub return_pct: f64,
}

impl TradeStats {
    pub fn compute(trades: &[TradeResult], starting_account: f64) -> Self {
        let (wins, losses): (Vec<&TradeResult>, Vec<&TradeResult>) =
            trades.iter().partition(|t| t.is_winner);
        let total_pnl: f64 = trades.iter().map(|t| t.profit_loss).sum();

        Self {
            total_trades: trades.len(),
            winners: wins.len(),
            losers: losses.len(),
            win_rate: ratio(wins.len() as f64, trades.len() as f64),
            avg_winner_r: mean_r(&wins),
            avg_loser_r: mean_r(&losses),
            total_pnl,
            starting_account,
            return_pct: ratio(total_pnl, starting_account),
        }
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn mean_r(trades: &[&TradeResult]) -> f64 {
    ratio(
        trades.iter().map(|t| t.risk_reward).sum(),
        trades.len() as f64,
    )
}

impl fmt::Display for TradeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total trades:   {}", self.total_trades)?;
        writeln!(
            f,
            "Winners/Losers: {} / {} ({:.1}% win rate)",
            self.winners,
            self.losers,
            self.win_rate * 100.0
        )?;
        writeln!(f, "Avg winner:     {:.2}R", self.avg_winner_r)?;
        writeln!(f, "Avg loser:      {:.2}R", self.avg_loser_r)?;
        writeln!(f, "Total P/L:      ${:.2}", self.total_pnl)?;
        write!(
            f,
            "Return:         {:.2}% on ${:.2}",
            self.return_pct * 100.0,
            self.starting_account
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn trade(pnl: f64, r: f64, winner: bool) -> TradeResult {
        TradeResult {
            symbol: "ABC".into(),
            entry_price: 10.0,
            exit_price: 10.0 + r,
            shares: 25,
            initial_risk: 1.0,
            profit_loss: pnl,
            risk_reward: r,
            entry_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            exit_date: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            exit_reason: String::new(),
            is_winner: winner,
            account_size: 10_000.0,
        }
    }

    #[test]
    fn empty_ledger() {
        let stats = TradeStats::compute(&[], 10_000.0);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.avg_winner_r, 0.0);
    }

    #[test]
    fn mixed_ledger() {
        let trades = vec![
            trade(40.0, 1.6, true),
            // break-even stop after a partial still counts as a winner
            trade(0.0, 0.0, true),
            trade(-100.0, -1.0, false),
            trade(-50.0, -0.5, false),
        ];
        let stats = TradeStats::compute(&trades, 10_000.0);
        assert_eq!(stats.total_trades, 4);
        assert_eq!((stats.winners, stats.losers), (2, 2));
        assert!((stats.win_rate - 0.5).abs() < 1e-12);
        assert!((stats.avg_winner_r - 0.8).abs() < 1e-12);
        assert!((stats.avg_loser_r + 0.75).abs() < 1e-12);
        assert!((stats.total_pnl + 110.0).abs() < 1e-12);
        assert!((stats.return_pct + 0.011).abs() < 1e-12);
        assert!(stats.to_string().contains("50.0% win rate"));
    }

    proptest! {
        #[test]
        fn counts_partition_the_ledger(
            rows in prop::collection::vec((-500.0f64..500.0, -2.0f64..6.0, any::<bool>()), 0..40)
        ) {
            let trades: Vec<TradeResult> = rows.iter().map(|&(pnl, r, w)| trade(pnl, r, w)).collect();
            let stats = TradeStats::compute(&trades, 10_000.0);
            prop_assert_eq!(stats.winners + stats.losers, stats.total_trades);
            prop_assert!((0.0..=1.0).contains(&stats.win_rate));
            let pnl: f64 = rows.iter().map(|r| r.0).sum();
            prop_assert!((stats.total_pnl - pnl).abs() < 1e-6);
        }
    }
}
