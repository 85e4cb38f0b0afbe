//! Entry sizing, the per-tick risk ladder, and exit recording.

pub mod config;
pub mod entry;
pub mod ladder;
pub mod recorder;

pub use config::{EntryConfig, LadderConfig, ProfitLevelConfig, TrailingTier};
pub use entry::{Candidate, EntryInitializer, EntryPlan, EntryRejection, RiskBudget};
pub use ladder::{LadderDecision, RiskLadder, Tick};
pub use recorder::{record_exit, ExitReason, RecordedExit};
