//! TradeResult: one row of the trade ledger, emitted per partial or full exit.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::csv_fmt;

/// Immutable record of shares leaving a position.
///
/// Field names serialize to the ledger's column headers
/// (`Symbol`, `EntryPrice`, ..., `AccountSize`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TradeResult {
    // ── Identification ──
    pub symbol: String,

    // ── Prices ──
    #[serde(serialize_with = "csv_fmt::cents")]
    pub entry_price: f64,
    #[serde(serialize_with = "csv_fmt::cents")]
    pub exit_price: f64,

    // ── Size ──
    #[serde(deserialize_with = "csv_fmt::whole_shares")]
    pub shares: u64,

    // ── Risk and PnL ──
    #[serde(serialize_with = "csv_fmt::cents")]
    pub initial_risk: f64,
    #[serde(serialize_with = "csv_fmt::cents")]
    pub profit_loss: f64,
    #[serde(serialize_with = "csv_fmt::cents")]
    pub risk_reward: f64,

    // ── Dates ──
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,

    // ── Classification ──
    pub exit_reason: String,
    pub is_winner: bool,

    /// Cash balance right after this exit was credited.
    #[serde(serialize_with = "csv_fmt::cents")]
    pub account_size: f64,
}

impl TradeResult {
    /// Holding period in calendar days.
    pub fn days_held(&self) -> i64 {
        (self.exit_date - self.entry_date).num_days()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trade() -> TradeResult {
        TradeResult {
            symbol: "ABC".into(),
            entry_price: 10.0,
            exit_price: 11.6,
            shares: 25,
            initial_risk: 1.0,
            profit_loss: 40.0,
            risk_reward: 1.6,
            entry_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            exit_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            exit_reason: "Profit Level 1 at 1.60R".into(),
            is_winner: true,
            account_size: 9_290.0,
        }
    }

    #[test]
    fn days_held_counts_calendar_days() {
        assert_eq!(sample_trade().days_held(), 4);
    }

    #[test]
    fn csv_uses_ledger_headers() {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(sample_trade()).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(
            header,
            "Symbol,EntryPrice,ExitPrice,Shares,InitialRisk,ProfitLoss,RiskReward,EntryDate,ExitDate,ExitReason,IsWinner,AccountSize"
        );
        assert!(text.contains("2024-03-01"));
        assert!(text.contains("true"));
    }

    #[test]
    fn reads_rows_with_fractional_share_text() {
        let data = "Symbol,EntryPrice,ExitPrice,Shares,InitialRisk,ProfitLoss,RiskReward,EntryDate,ExitDate,ExitReason,IsWinner,AccountSize\n\
                    ABC,10.00,11.60,25.00,1.00,40.00,1.60,2024-03-01,2024-03-05,Profit Level 1 at 1.60R,true,9290.00\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let row: TradeResult = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(row, sample_trade());
    }
}
