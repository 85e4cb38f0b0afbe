//! Intraday alerts: conditions spotted by a dry-run of the ladder.
//!
//! Each condition is raised at most once per symbol per day, so a polling
//! loop can call in every cycle without flooding the log.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use pivotlab_core::domain::{Position, ProfitLevel};
use pivotlab_core::risk::{ExitReason, LadderDecision};
use serde::Serialize;
use tracing::warn;

use crate::config::LiveConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlertKind {
    /// Day one, price within `near_stop_pct` of the stop.
    NearStop,
    /// Price at or below the stop.
    AtStop,
    StrongEp,
    ProfitLevel(ProfitLevel),
    /// Price within `near_ma_pct` of the trailing moving average.
    NearTrailingMa,
    BelowTrailingBand,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::NearStop => f.write_str("near stop"),
            AlertKind::AtStop => f.write_str("at or below stop"),
            AlertKind::StrongEp => f.write_str("strong EP"),
            AlertKind::ProfitLevel(level) => write!(f, "profit level {} reached", level.number()),
            AlertKind::NearTrailingMa => f.write_str("near trailing MA"),
            AlertKind::BelowTrailingBand => f.write_str("below trailing band"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub symbol: String,
    pub date: NaiveDate,
    pub kind: AlertKind,
    pub price: f64,
    pub stop: f64,
}

/// Conditions for `position` given a preview of the ladder at `price`.
///
/// `position` is the state before the preview; `decision` is what the
/// ladder would do.
pub fn detect(
    position: &Position,
    decision: &LadderDecision,
    price: f64,
    trailing_ma: Option<f64>,
    live: &LiveConfig,
) -> Vec<AlertKind> {
    let mut kinds = Vec::new();

    if position.days_held == 0
        && price > position.stop_loss
        && price <= position.stop_loss * (1.0 + live.near_stop_pct)
    {
        kinds.push(AlertKind::NearStop);
    }

    match decision {
        LadderDecision::FullExit { reason, .. } => match reason {
            ExitReason::TrailingBand { .. } => kinds.push(AlertKind::BelowTrailingBand),
            _ => kinds.push(AlertKind::AtStop),
        },
        LadderDecision::PartialExit { reason, .. } => match reason {
            ExitReason::StrongEp { .. } => kinds.push(AlertKind::StrongEp),
            ExitReason::ProfitLevel { level, .. } => kinds.push(AlertKind::ProfitLevel(*level)),
            _ => {}
        },
        _ => {}
    }

    if let Some(ma) = trailing_ma {
        if position.trailing_stop_mode
            && price >= ma
            && price <= ma * (1.0 + live.near_ma_pct)
        {
            kinds.push(AlertKind::NearTrailingMa);
        }
    }
    kinds
}

/// Remembers which alerts were already raised.
#[derive(Debug, Default)]
pub struct AlertLog {
    seen: HashSet<(String, NaiveDate, AlertKind)>,
    raised: Vec<Alert>,
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `alert` unless the same condition already fired for that symbol
    /// today. Returns whether it was new.
    pub fn raise(&mut self, alert: Alert) -> bool {
        let key = (alert.symbol.clone(), alert.date, alert.kind);
        if !self.seen.insert(key) {
            return false;
        }
        warn!(
            symbol = %alert.symbol,
            date = %alert.date,
            price = alert.price,
            stop = alert.stop,
            "ALERT: {}",
            alert.kind
        );
        self.raised.push(alert);
        true
    }

    pub fn raised(&self) -> &[Alert] {
        &self.raised
    }

    /// Forget days before `date`.
    pub fn prune_before(&mut self, date: NaiveDate) {
        self.seen.retain(|(_, d, _)| *d >= date);
        self.raised.retain(|a| a.date >= date);
    }
}
