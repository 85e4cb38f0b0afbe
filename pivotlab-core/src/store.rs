//! Position store: the in-memory set of open positions.
//!
//! The store is the primary record; the watchlist file is written through
//! from it after every mutation. One owner (the session) holds it, so all
//! mutation is single-writer by construction.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::Position;

#[derive(Debug, Clone, Default)]
pub struct PositionStore {
    positions: BTreeMap<String, Position>,
    /// Symbols already opened or rejected this run; never re-attempted.
    processed: BTreeSet<String>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open position. Returns false, leaving the store unchanged, if
    /// the symbol is already active.
    pub fn insert(&mut self, position: Position) -> bool {
        if self.positions.contains_key(&position.symbol) {
            return false;
        }
        self.processed.insert(position.symbol.clone());
        self.positions.insert(position.symbol.clone(), position);
        true
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn remove(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    /// Active symbols in sorted order.
    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn mark_processed(&mut self, symbol: &str) {
        self.processed.insert(symbol.to_string());
    }

    pub fn is_processed(&self, symbol: &str) -> bool {
        self.processed.contains(symbol)
    }

    /// Marked value of all open shares. Symbols without a price are valued
    /// at entry.
    pub fn market_value(&self, price_of: impl Fn(&str) -> Option<f64>) -> f64 {
        self.positions
            .values()
            .map(|p| p.market_value(price_of(&p.symbol).unwrap_or(p.entry_price)))
            .sum()
    }
}
