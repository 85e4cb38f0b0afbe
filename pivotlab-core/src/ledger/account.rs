//! Account ledger: the single cash balance every entry and exit moves.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLedger {
    starting: f64,
    cash: f64,
}

impl AccountLedger {
    pub fn new(starting: f64) -> Self {
        Self {
            starting,
            cash: starting,
        }
    }

    /// Ledger whose cash already differs from the starting balance, e.g.
    /// after restoring open positions.
    pub fn with_cash(starting: f64, cash: f64) -> Self {
        Self { starting, cash }
    }

    pub fn starting(&self) -> f64 {
        self.starting
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn debit(&mut self, amount: f64) {
        self.cash -= amount;
    }

    pub fn credit(&mut self, amount: f64) {
        self.cash += amount;
    }

    /// Realized return on the starting balance, as a fraction.
    pub fn return_pct(&self, equity: f64) -> f64 {
        if self.starting <= 0.0 {
            return 0.0;
        }
        (equity - self.starting) / self.starting
    }
}
