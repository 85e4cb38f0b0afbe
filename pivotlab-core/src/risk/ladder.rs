//! Risk ladder engine: the per-tick state machine for an open position.
//!
//! Rules run in a fixed priority order and at most one exit fires per tick:
//!
//! 1. stop-loss (day 1 on the low, later days on the close)
//! 2. breakeven protection
//! 3. no-follow-through tightening
//! 4. strong-move partial exit
//! 5. graduated profit levels L1, L2, L3
//! 6. tiered trailing stop
//!
//! Rules 2, 3 and 6 only ever raise the stop. The engine updates the
//! position's ladder state; shares and realized profit are changed by the
//! exit recorder when the caller acts on the returned decision.

use chrono::NaiveDate;
use tracing::{debug, info};

use super::config::LadderConfig;
use super::recorder::ExitReason;
use crate::domain::{Bar, Position, ProfitLevel};
use crate::indicators::{Indicator, Sma};

/// One observation of a symbol's price for a period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub date: NaiveDate,
    pub close: f64,
    pub low: f64,
    pub high: f64,
    /// Moving average the trailing stop is measured from.
    pub trailing_ma: Option<f64>,
}

impl Tick {
    pub fn from_bar(bar: &Bar, trailing_ma: Option<f64>) -> Self {
        Self {
            date: bar.date,
            close: bar.close,
            low: bar.low,
            high: bar.high,
            trailing_ma,
        }
    }

    /// Tick for `bars[index]` with the trailing MA computed from history
    /// ending on that bar.
    pub fn from_history(bars: &[Bar], index: usize, ma_period: usize) -> Option<Self> {
        let bar = bars.get(index)?;
        let ma = Sma::new(ma_period).value_at(bars, index);
        Some(Self::from_bar(bar, ma))
    }

    /// A single intraday price treated as close, low and high.
    pub fn intraday(date: NaiveDate, price: f64, trailing_ma: Option<f64>) -> Self {
        Self {
            date,
            close: price,
            low: price,
            high: price,
            trailing_ma,
        }
    }
}

/// What the caller must do after a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum LadderDecision {
    /// Tick already seen, or dated before the purchase.
    Ignored,
    Hold {
        stop_raised: bool,
    },
    PartialExit {
        shares: u64,
        price: f64,
        reason: ExitReason,
    },
    FullExit {
        price: f64,
        reason: ExitReason,
    },
}

impl LadderDecision {
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            LadderDecision::PartialExit { .. } | LadderDecision::FullExit { .. }
        )
    }

    /// Whether the position changed and must be written through.
    pub fn mutated(&self) -> bool {
        !matches!(self, LadderDecision::Ignored)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskLadder {
    config: LadderConfig,
}

impl RiskLadder {
    pub fn new(config: LadderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    /// Dry-run a tick against a copy of `position`.
    pub fn preview(&self, position: &Position, tick: &Tick) -> (Position, LadderDecision) {
        let mut copy = position.clone();
        let decision = self.evaluate(&mut copy, tick);
        (copy, decision)
    }

    /// Evaluate one tick, updating `position`'s ladder state.
    pub fn evaluate(&self, position: &mut Position, tick: &Tick) -> LadderDecision {
        if tick.date < position.purchase_date
            || position.last_check_date.is_some_and(|last| tick.date <= last)
        {
            return LadderDecision::Ignored;
        }

        position.days_held += 1;
        position.last_check_date = Some(tick.date);
        if tick.high > position.highest_price {
            position.highest_price = tick.high;
        }

        let stop_before = position.stop_loss;
        let r = position.r_multiple(tick.close);

        debug!(
            symbol = %position.symbol,
            date = %tick.date,
            day = position.days_held,
            close = tick.close,
            low = tick.low,
            high = tick.high,
            r,
            stop = position.stop_loss,
            status = %position.status,
            "evaluating"
        );

        if let Some(decision) = self.check_stop(position, tick) {
            return decision;
        }

        self.apply_breakeven(position, tick);
        self.apply_no_follow_through(position, tick, r);

        if let Some(decision) = self.check_strong_ep(position, tick, stop_before) {
            return decision;
        }
        if let Some(decision) = self.check_profit_levels(position, tick, r, stop_before) {
            return decision;
        }
        if let Some(decision) = self.apply_trailing(position, tick) {
            return decision;
        }

        LadderDecision::Hold {
            stop_raised: position.stop_loss > stop_before,
        }
    }

    fn check_stop(&self, position: &Position, tick: &Tick) -> Option<LadderDecision> {
        // day 1 risk is live intraday; afterwards only the close counts
        let observed = if position.days_held == 1 {
            tick.low
        } else {
            tick.close
        };
        if observed > position.stop_loss {
            return None;
        }

        let reason = if position.profit_taken() {
            ExitReason::TrailingStop
        } else {
            ExitReason::StopLoss
        };
        info!(
            symbol = %position.symbol,
            date = %tick.date,
            day = position.days_held,
            observed,
            stop = position.stop_loss,
            "stop breached"
        );
        Some(LadderDecision::FullExit {
            price: position.stop_loss,
            reason,
        })
    }

    fn apply_breakeven(&self, position: &mut Position, tick: &Tick) {
        let cfg = &self.config;
        if position.days_held < cfg.breakeven_min_days || position.profit_taken() {
            return;
        }
        let gain = position.gain_pct(tick.high);
        if gain >= cfg.breakeven_trigger_pct && position.raise_stop(position.entry_price) {
            info!(
                symbol = %position.symbol,
                date = %tick.date,
                day = position.days_held,
                gain_pct = gain * 100.0,
                stop = position.stop_loss,
                "moved stop to breakeven"
            );
        }
    }

    fn apply_no_follow_through(&self, position: &mut Position, tick: &Tick, r: f64) {
        let cfg = &self.config;
        if position.days_held < cfg.no_follow_through_days
            || position.profit_taken()
            || r >= cfg.no_follow_through_min_r
        {
            return;
        }
        let tightened =
            position.entry_price - position.initial_risk * cfg.no_follow_through_risk_fraction;
        if position.raise_stop(tightened) {
            info!(
                symbol = %position.symbol,
                date = %tick.date,
                day = position.days_held,
                r,
                stop = position.stop_loss,
                "no follow-through, tightened stop"
            );
        }
    }

    fn check_strong_ep(
        &self,
        position: &mut Position,
        tick: &Tick,
        stop_before: f64,
    ) -> Option<LadderDecision> {
        let cfg = &self.config;
        let gain = position.gain_pct(tick.close);
        if position.days_held > cfg.strong_ep_max_days
            || position.profit_taken()
            || gain < cfg.strong_ep_gain
        {
            return None;
        }

        position.take_strong_ep();
        position.trailing_stop_mode = true;
        position.raise_stop(position.entry_price);

        let shares = (position.shares as f64 * cfg.strong_ep_fraction).floor() as u64;
        info!(
            symbol = %position.symbol,
            date = %tick.date,
            day = position.days_held,
            gain_pct = gain * 100.0,
            shares,
            "strong EP"
        );
        Some(partial_or_hold(
            position,
            stop_before,
            shares,
            tick.close,
            ExitReason::StrongEp { gain },
        ))
    }

    fn check_profit_levels(
        &self,
        position: &mut Position,
        tick: &Tick,
        r: f64,
        stop_before: f64,
    ) -> Option<LadderDecision> {
        // a strong-EP exit has already taken the first rung
        let level = ProfitLevel::ALL.into_iter().find(|&level| {
            let ready = !position.level_taken(level)
                && level.prerequisite().map_or(true, |prev| position.level_taken(prev));
            ready && r >= self.config.level(level).r_multiple
        })?;
        let cfg = self.config.level(level);

        if !position.take_level(level) {
            return None;
        }
        position.trailing_stop_mode = true;
        if position.days_held >= cfg.lock_min_days {
            position.raise_stop(position.entry_price + position.initial_risk * cfg.lock_r);
        }

        let planned = (position.initial_shares as f64 * cfg.fraction).floor() as u64;
        let shares = planned.min(position.shares);
        info!(
            symbol = %position.symbol,
            date = %tick.date,
            level = level.number(),
            r,
            shares,
            stop = position.stop_loss,
            "profit level reached"
        );
        Some(partial_or_hold(
            position,
            stop_before,
            shares,
            tick.close,
            ExitReason::ProfitLevel { level, r },
        ))
    }

    fn apply_trailing(&self, position: &mut Position, tick: &Tick) -> Option<LadderDecision> {
        if !position.trailing_stop_mode {
            return None;
        }
        let gain = position.gain_pct(tick.close);
        let tier = self.config.tier_for(gain)?;
        let keep = 1.0 - tier.band;

        let mut floor = (tick.close * keep).max(position.entry_price);
        if let Some(ma) = tick.trailing_ma {
            floor = floor.max(ma * keep);
        }
        if position.raise_stop(floor) {
            debug!(
                symbol = %position.symbol,
                date = %tick.date,
                gain_pct = gain * 100.0,
                band = tier.band,
                stop = position.stop_loss,
                "trailing stop raised"
            );
        }

        let ma = tick.trailing_ma?;
        if tick.close < ma * keep {
            info!(
                symbol = %position.symbol,
                date = %tick.date,
                close = tick.close,
                ma,
                band = tier.band,
                "closed below trailing band"
            );
            return Some(LadderDecision::FullExit {
                price: tick.close,
                reason: ExitReason::TrailingBand { band: tier.band },
            });
        }
        None
    }
}

fn partial_or_hold(
    position: &Position,
    stop_before: f64,
    shares: u64,
    price: f64,
    reason: ExitReason,
) -> LadderDecision {
    if shares == 0 {
        // tranche rounds to nothing; the level still counts as taken
        LadderDecision::Hold {
            stop_raised: position.stop_loss > stop_before,
        }
    } else {
        LadderDecision::PartialExit {
            shares,
            price,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PositionStatus;
    use crate::risk::config::TrailingTier;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn position() -> Position {
        Position::open("ABC", d(1), 10.0, 9.0, 100, 9.2, 10.5)
    }

    fn tick(day: u32, close: f64) -> Tick {
        Tick {
            date: d(day),
            close,
            low: close - 0.1,
            high: close + 0.1,
            trailing_ma: None,
        }
    }

    #[test]
    fn day_one_stops_on_low() {
        let ladder = RiskLadder::default();
        let mut pos = position();
        let t = Tick {
            low: 8.9,
            ..tick(1, 9.5)
        };
        assert_eq!(
            ladder.evaluate(&mut pos, &t),
            LadderDecision::FullExit {
                price: 9.0,
                reason: ExitReason::StopLoss
            }
        );
    }

    #[test]
    fn later_days_ignore_intraday_wick() {
        let ladder = RiskLadder::default();
        let mut pos = position();
        ladder.evaluate(&mut pos, &tick(1, 9.6));
        let wick = Tick {
            low: 8.5,
            ..tick(2, 9.4)
        };
        assert!(matches!(
            ladder.evaluate(&mut pos, &wick),
            LadderDecision::Hold { .. }
        ));
    }

    #[test]
    fn repeated_tick_is_ignored() {
        let ladder = RiskLadder::default();
        let mut pos = position();
        ladder.evaluate(&mut pos, &tick(1, 9.6));
        let snapshot = pos.clone();
        assert_eq!(ladder.evaluate(&mut pos, &tick(1, 9.6)), LadderDecision::Ignored);
        assert_eq!(pos, snapshot);
    }

    #[test]
    fn tick_before_purchase_is_ignored() {
        let ladder = RiskLadder::default();
        let mut pos = Position::open("ABC", d(5), 10.0, 9.0, 100, 9.2, 10.5);
        assert_eq!(ladder.evaluate(&mut pos, &tick(4, 10.0)), LadderDecision::Ignored);
        assert_eq!(pos.days_held, 0);
    }

    #[test]
    fn breakeven_waits_for_day_two() {
        let ladder = RiskLadder::default();
        let mut pos = position();
        ladder.evaluate(&mut pos, &tick(1, 10.5));
        assert_eq!(pos.stop_loss, 9.0);
        let decision = ladder.evaluate(&mut pos, &tick(2, 10.3));
        assert_eq!(decision, LadderDecision::Hold { stop_raised: true });
        assert_eq!(pos.stop_loss, 10.0);
    }

    #[test]
    fn no_follow_through_tightens_stop() {
        let ladder = RiskLadder::default();
        let mut pos = position();
        for day in 1..=7 {
            ladder.evaluate(&mut pos, &Tick { high: 10.1, ..tick(day, 9.9) });
        }
        assert_eq!(pos.stop_loss, 9.0);
        ladder.evaluate(&mut pos, &Tick { high: 10.1, ..tick(8, 9.9) });
        assert!((pos.stop_loss - 9.7).abs() < 1e-9);
    }

    #[test]
    fn strong_ep_sells_fraction_of_current_shares() {
        let ladder = RiskLadder::default();
        let mut pos = position();
        ladder.evaluate(&mut pos, &tick(1, 10.4));
        let decision = ladder.evaluate(&mut pos, &tick(2, 11.8));
        match decision {
            LadderDecision::PartialExit { shares, price, reason } => {
                assert_eq!(shares, 30);
                assert_eq!(price, 11.8);
                assert!(matches!(reason, ExitReason::StrongEp { .. }));
            }
            other => panic!("expected strong EP partial, got {other:?}"),
        }
        assert_eq!(pos.status, PositionStatus::MonitoringStrongEp);
        assert!(pos.trailing_stop_mode);
        assert_eq!(pos.stop_loss, 10.0);
    }

    #[test]
    fn strong_ep_then_upper_levels() {
        let ladder = RiskLadder::default();
        let mut pos = position();
        let first = ladder.evaluate(&mut pos, &tick(1, 11.6));
        assert!(matches!(
            first,
            LadderDecision::PartialExit { shares: 30, reason: ExitReason::StrongEp { .. }, .. }
        ));
        pos.shares = 70;

        // 2R: the first rung is already spent
        assert!(!ladder.evaluate(&mut pos, &tick(2, 12.0)).is_exit());

        let second = ladder.evaluate(&mut pos, &tick(3, 13.1));
        assert!(matches!(
            second,
            LadderDecision::PartialExit {
                shares: 25,
                reason: ExitReason::ProfitLevel { level: ProfitLevel::L2, .. },
                ..
            }
        ));
        assert_eq!(pos.status, PositionStatus::MonitoringL2);
        pos.shares = 45;

        let third = ladder.evaluate(&mut pos, &tick(4, 15.2));
        assert!(matches!(
            third,
            LadderDecision::PartialExit {
                shares: 25,
                reason: ExitReason::ProfitLevel { level: ProfitLevel::L3, .. },
                ..
            }
        ));
        assert_eq!(pos.status, PositionStatus::MonitoringL3);
        assert!(pos.stop_loss >= 12.0);
    }

    #[test]
    fn empty_tranche_reports_unmoved_stop() {
        let ladder = RiskLadder::default();
        let mut pos = Position::open("ABC", d(1), 10.0, 9.0, 1, 9.2, 10.5);
        ladder.evaluate(&mut pos, &tick(1, 10.1));
        ladder.evaluate(&mut pos, &tick(2, 10.2));
        assert_eq!(pos.stop_loss, 10.0);

        // strong EP on one share sells nothing and the stop is already at entry
        let decision = ladder.evaluate(&mut pos, &tick(3, 11.6));
        assert_eq!(decision, LadderDecision::Hold { stop_raised: false });
        assert!(pos.strong_ep_taken);
        assert_eq!(pos.stop_loss, 10.0);
    }

    #[test]
    fn levels_fire_one_per_tick_in_order() {
        let ladder = RiskLadder::default();
        let mut pos = position();
        ladder.evaluate(&mut pos, &tick(1, 10.1));
        ladder.evaluate(&mut pos, &tick(2, 10.2));
        ladder.evaluate(&mut pos, &tick(3, 10.3));
        ladder.evaluate(&mut pos, &tick(4, 10.4));

        // gap straight past L2's threshold still takes L1 first
        let first = ladder.evaluate(&mut pos, &tick(5, 13.5));
        assert!(matches!(
            first,
            LadderDecision::PartialExit {
                reason: ExitReason::ProfitLevel { level: ProfitLevel::L1, .. },
                ..
            }
        ));
        pos.shares -= 25;
        let second = ladder.evaluate(&mut pos, &tick(6, 13.6));
        assert!(matches!(
            second,
            LadderDecision::PartialExit {
                shares: 25,
                reason: ExitReason::ProfitLevel { level: ProfitLevel::L2, .. },
                ..
            }
        ));
        assert_eq!(pos.status, PositionStatus::MonitoringL2);
        assert!((pos.stop_loss - 11.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_band_exit_below_ma() {
        let ladder = RiskLadder::default();
        let mut pos = position();
        pos.trailing_stop_mode = true;
        pos.profit_taken_l1 = true;
        pos.status = PositionStatus::MonitoringL1;
        let t = Tick {
            trailing_ma: Some(12.5),
            ..tick(1, 11.5)
        };
        // day 1 low check passes, gain 15% -> 5% band; 11.5 < 12.5 * 0.95
        let decision = ladder.evaluate(&mut pos, &t);
        assert_eq!(
            decision,
            LadderDecision::FullExit {
                price: 11.5,
                reason: ExitReason::TrailingBand { band: 0.05 }
            }
        );
    }

    #[test]
    fn trailing_floor_never_below_entry() {
        let ladder = RiskLadder::new(LadderConfig {
            trailing_tiers: vec![TrailingTier {
                min_gain: 0.01,
                band: 0.10,
            }],
            ..LadderConfig::default()
        });
        let mut pos = position();
        pos.trailing_stop_mode = true;
        pos.profit_taken_l1 = true;
        let t = Tick {
            trailing_ma: Some(10.2),
            ..tick(1, 10.3)
        };
        ladder.evaluate(&mut pos, &t);
        assert_eq!(pos.stop_loss, 10.0);

        ladder.evaluate(&mut pos, &Tick { trailing_ma: Some(10.2), ..tick(2, 11.5) });
        assert!((pos.stop_loss - 10.35).abs() < 1e-9);
    }

    #[test]
    fn preview_leaves_position_untouched() {
        let ladder = RiskLadder::default();
        let pos = position();
        let (after, decision) = ladder.preview(&pos, &tick(1, 8.0));
        assert!(decision.is_exit());
        assert_eq!(after.days_held, 1);
        assert_eq!(pos.days_held, 0);
    }

    #[test]
    fn tick_from_history_uses_trailing_ma() {
        let bars = crate::indicators::make_bars(&[10.0, 11.0, 12.0, 13.0]);
        let t = Tick::from_history(&bars, 3, 3).unwrap();
        assert_eq!(t.close, 13.0);
        assert_eq!(t.trailing_ma, Some(12.0));
        assert_eq!(Tick::from_history(&bars, 1, 3).unwrap().trailing_ma, None);
    }
}
