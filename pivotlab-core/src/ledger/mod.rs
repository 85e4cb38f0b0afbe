//! Cash and trade ledgers.

pub mod account;
pub mod trades;

pub use account::AccountLedger;
pub use trades::TradeLedger;
