//! Position: the per-symbol state the risk ladder owns while a trade is open.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Graduated profit-taking level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProfitLevel {
    L1,
    L2,
    L3,
}

impl ProfitLevel {
    pub const ALL: [ProfitLevel; 3] = [ProfitLevel::L1, ProfitLevel::L2, ProfitLevel::L3];

    pub fn number(self) -> u8 {
        match self {
            ProfitLevel::L1 => 1,
            ProfitLevel::L2 => 2,
            ProfitLevel::L3 => 3,
        }
    }

    /// The level that must already be taken before this one may fire.
    pub fn prerequisite(self) -> Option<ProfitLevel> {
        match self {
            ProfitLevel::L1 => None,
            ProfitLevel::L2 => Some(ProfitLevel::L1),
            ProfitLevel::L3 => Some(ProfitLevel::L2),
        }
    }
}

/// Lifecycle status of an open position.
///
/// Progression is monotonic and never moves back. The first rung is
/// either `MonitoringL1` or `MonitoringStrongEp`; both continue to
/// `MonitoringL2` and `MonitoringL3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Holding,
    MonitoringL1,
    MonitoringL2,
    MonitoringL3,
    MonitoringStrongEp,
}

impl PositionStatus {
    /// Ordering used to enforce monotonic progression.
    pub fn rank(self) -> u8 {
        match self {
            PositionStatus::Holding => 0,
            PositionStatus::MonitoringL1 | PositionStatus::MonitoringStrongEp => 1,
            PositionStatus::MonitoringL2 => 2,
            PositionStatus::MonitoringL3 => 3,
        }
    }

    pub fn for_level(level: ProfitLevel) -> Self {
        match level {
            ProfitLevel::L1 => PositionStatus::MonitoringL1,
            ProfitLevel::L2 => PositionStatus::MonitoringL2,
            ProfitLevel::L3 => PositionStatus::MonitoringL3,
        }
    }

    /// Watchlist label. Written to the persisted row, never inspected by the engine.
    pub fn label(self) -> &'static str {
        match self {
            PositionStatus::Holding => "HOLDING",
            PositionStatus::MonitoringL1 => "MONITORING (Lvl 1)",
            PositionStatus::MonitoringL2 => "MONITORING (Lvl 2)",
            PositionStatus::MonitoringL3 => "MONITORING (Lvl 3)",
            PositionStatus::MonitoringStrongEp => "MONITORING (Strong EP)",
        }
    }

    /// Exact-match lookup of a persisted label.
    ///
    /// Bare `MONITORING` is what older watchlists wrote after the first
    /// partial exit; it restores as level 1.
    pub fn from_label(label: &str) -> Option<Self> {
        let status = match label.trim() {
            "HOLDING" => PositionStatus::Holding,
            "MONITORING (Lvl 1)" | "MONITORING" => PositionStatus::MonitoringL1,
            "MONITORING (Lvl 2)" => PositionStatus::MonitoringL2,
            "MONITORING (Lvl 3)" => PositionStatus::MonitoringL3,
            "MONITORING (Strong EP)" => PositionStatus::MonitoringStrongEp,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An open long position managed by the risk ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    // ── Identification ──
    pub symbol: String,
    pub purchase_date: NaiveDate,

    // ── Entry and risk ──
    pub entry_price: f64,
    pub stop_loss: f64,
    pub initial_stop_loss: f64,
    /// `entry_price - initial_stop_loss`, fixed at entry.
    pub initial_risk: f64,
    pub ep_day_low: f64,
    pub ep_day_high: f64,

    // ── Size ──
    pub shares: u64,
    pub initial_shares: u64,

    // ── Progress ──
    pub days_held: u32,
    pub last_check_date: Option<NaiveDate>,
    pub highest_price: f64,
    pub cumulative_profit: f64,

    // ── Ladder state ──
    pub status: PositionStatus,
    pub profit_taken_l1: bool,
    pub profit_taken_l2: bool,
    pub profit_taken_l3: bool,
    pub strong_ep_taken: bool,
    pub trailing_stop_mode: bool,
}

impl Position {
    /// A freshly opened position in `Holding` state.
    pub fn open(
        symbol: impl Into<String>,
        purchase_date: NaiveDate,
        entry_price: f64,
        stop_loss: f64,
        shares: u64,
        ep_day_low: f64,
        ep_day_high: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            purchase_date,
            entry_price,
            stop_loss,
            initial_stop_loss: stop_loss,
            initial_risk: entry_price - stop_loss,
            ep_day_low,
            ep_day_high,
            shares,
            initial_shares: shares,
            days_held: 0,
            last_check_date: None,
            highest_price: entry_price,
            cumulative_profit: 0.0,
            status: PositionStatus::Holding,
            profit_taken_l1: false,
            profit_taken_l2: false,
            profit_taken_l3: false,
            strong_ep_taken: false,
            trailing_stop_mode: false,
        }
    }

    /// True once any partial exit has banked profit.
    pub fn profit_taken(&self) -> bool {
        self.profit_taken_l1 || self.strong_ep_taken
    }

    /// Take the first rung through a strong-EP exit. Returns false if any
    /// profit was already taken.
    pub fn take_strong_ep(&mut self) -> bool {
        if self.profit_taken() {
            return false;
        }
        self.strong_ep_taken = true;
        self.profit_taken_l1 = true;
        self.advance_status(PositionStatus::MonitoringStrongEp);
        true
    }

    pub fn level_taken(&self, level: ProfitLevel) -> bool {
        match level {
            ProfitLevel::L1 => self.profit_taken_l1,
            ProfitLevel::L2 => self.profit_taken_l2,
            ProfitLevel::L3 => self.profit_taken_l3,
        }
    }

    /// Mark a level as taken. Returns false if it was already taken or its
    /// prerequisite is missing.
    pub fn take_level(&mut self, level: ProfitLevel) -> bool {
        if self.level_taken(level) {
            return false;
        }
        if let Some(prev) = level.prerequisite() {
            if !self.level_taken(prev) {
                return false;
            }
        }
        match level {
            ProfitLevel::L1 => self.profit_taken_l1 = true,
            ProfitLevel::L2 => self.profit_taken_l2 = true,
            ProfitLevel::L3 => self.profit_taken_l3 = true,
        }
        self.advance_status(PositionStatus::for_level(level));
        true
    }

    /// Move status forward; a lower-ranked status is ignored.
    pub fn advance_status(&mut self, next: PositionStatus) {
        if next.rank() > self.status.rank() {
            self.status = next;
        }
    }

    /// Raise the stop to `candidate` if that is higher. Returns true on change.
    pub fn raise_stop(&mut self, candidate: f64) -> bool {
        if candidate.is_finite() && candidate > self.stop_loss {
            self.stop_loss = candidate;
            true
        } else {
            false
        }
    }

    /// Unrealized gain per share at `price`, in multiples of initial risk.
    pub fn r_multiple(&self, price: f64) -> f64 {
        if self.initial_risk <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.initial_risk
    }

    /// Unrealized gain at `price` as a fraction of the entry price.
    pub fn gain_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.shares as f64 * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.shares as f64 * (price - self.entry_price)
    }

    pub fn is_closed(&self) -> bool {
        self.shares == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Position {
        Position::open(
            "ABC",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            10.0,
            9.0,
            100,
            9.2,
            10.5,
        )
    }

    #[test]
    fn open_sets_initial_state() {
        let pos = sample();
        assert_eq!(pos.initial_risk, 1.0);
        assert_eq!(pos.initial_shares, 100);
        assert_eq!(pos.highest_price, 10.0);
        assert_eq!(pos.status, PositionStatus::Holding);
        assert!(!pos.profit_taken());
        assert!(pos.last_check_date.is_none());
    }

    #[test]
    fn levels_require_prerequisite() {
        let mut pos = sample();
        assert!(!pos.take_level(ProfitLevel::L2));
        assert!(pos.take_level(ProfitLevel::L1));
        assert!(!pos.take_level(ProfitLevel::L1));
        assert!(!pos.take_level(ProfitLevel::L3));
        assert!(pos.take_level(ProfitLevel::L2));
        assert!(pos.take_level(ProfitLevel::L3));
        assert_eq!(pos.status, PositionStatus::MonitoringL3);
    }

    #[test]
    fn strong_ep_counts_as_first_rung() {
        let mut pos = sample();
        assert!(pos.take_strong_ep());
        assert!(!pos.take_strong_ep());
        assert_eq!(pos.status, PositionStatus::MonitoringStrongEp);
        assert!(!pos.take_level(ProfitLevel::L1));
        assert!(pos.take_level(ProfitLevel::L2));
        assert_eq!(pos.status, PositionStatus::MonitoringL2);
        assert!(pos.take_level(ProfitLevel::L3));
        assert_eq!(pos.status, PositionStatus::MonitoringL3);
    }

    #[test]
    fn status_never_regresses() {
        let mut pos = sample();
        pos.advance_status(PositionStatus::MonitoringL2);
        pos.advance_status(PositionStatus::MonitoringL1);
        assert_eq!(pos.status, PositionStatus::MonitoringL2);
    }

    #[test]
    fn raise_stop_only_moves_up() {
        let mut pos = sample();
        assert!(pos.raise_stop(9.5));
        assert!(!pos.raise_stop(9.1));
        assert!(!pos.raise_stop(f64::NAN));
        assert_eq!(pos.stop_loss, 9.5);
        assert_eq!(pos.initial_stop_loss, 9.0);
    }

    #[test]
    fn r_multiple_and_gain() {
        let pos = sample();
        assert!((pos.r_multiple(11.6) - 1.6).abs() < 1e-12);
        assert!((pos.gain_pct(11.0) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn status_labels_roundtrip() {
        for status in [
            PositionStatus::Holding,
            PositionStatus::MonitoringL1,
            PositionStatus::MonitoringL2,
            PositionStatus::MonitoringL3,
            PositionStatus::MonitoringStrongEp,
        ] {
            assert_eq!(PositionStatus::from_label(status.label()), Some(status));
        }
        assert_eq!(
            PositionStatus::from_label("MONITORING"),
            Some(PositionStatus::MonitoringL1)
        );
        assert_eq!(PositionStatus::from_label("PENDING"), None);
    }
}
