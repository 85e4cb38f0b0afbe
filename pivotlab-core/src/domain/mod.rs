//! Domain types for pivotlab

pub mod bar;
pub mod position;
pub mod trade;

pub use bar::{index_of, last_index_on_or_before, normalize_bars, Bar};
pub use position::{Position, PositionStatus, ProfitLevel};
pub use trade::TradeResult;

/// Symbol type alias
pub type Symbol = String;
