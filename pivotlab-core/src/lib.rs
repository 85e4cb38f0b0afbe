//! PivotLab Core: domain types, market data, entry sizing, the risk ladder
//! and its ledgers.
//!
//! This crate holds everything that decides what happens to a position:
//! - Domain types (bars, positions, trade results)
//! - Indicators used by entry filters and trailing stops
//! - Market data providers, the Parquet bar cache and download pipeline
//! - Entry initializer and the per-tick risk ladder engine
//! - Exit recorder, account ledger and trade ledger
//! - Position store, watchlist persistence and order sinks
//!
//! Scheduling (live polling, backtest replay) lives in `pivotlab-runner`.

pub mod csv_fmt;
pub mod data;
pub mod domain;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod orders;
pub mod risk;
pub mod store;
pub mod watchlist;

pub use error::PersistenceError;
pub use store::PositionStore;
pub use watchlist::{Watchlist, WatchlistRow};
