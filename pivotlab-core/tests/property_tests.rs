//! Property tests for ladder and entry invariants.
//!
//! Uses proptest to verify:
//! 1. Stop ratchet: the stop never moves down
//! 2. Share conservation: shares sold plus shares left equal shares bought
//! 3. Level ordering: L2 never without L1, L3 never without L2
//! 4. Idempotence: a repeated tick changes nothing
//! 5. Straight rally: a gapless rising series reaches level 3
//! 6. Affordability: entries never cost more than available cash

use chrono::NaiveDate;
use proptest::prelude::*;
use pivotlab_core::domain::{Bar, Position, PositionStatus};
use pivotlab_core::ledger::AccountLedger;
use pivotlab_core::risk::{
    record_exit, Candidate, EntryInitializer, LadderDecision, RiskBudget, RiskLadder, Tick,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

/// Bars compounding `returns` from a $10 open, one calendar day apart.
fn bars_from_returns(returns: &[f64]) -> Vec<Bar> {
    let mut price = 10.0;
    returns
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let open = price;
            let close = (price * (1.0 + r)).max(0.05);
            price = close;
            Bar {
                date: start() + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) * 1.01,
                low: open.min(close) * 0.99,
                close,
                volume: 1_000_000,
            }
        })
        .collect()
}

/// Run `bars` through the ladder, applying exits. `on_tick` sees the
/// position after each evaluation with the stop it had before. Returns the
/// shares sold by each exit.
fn replay(
    ladder: &RiskLadder,
    pos: &mut Position,
    bars: &[Bar],
    mut on_tick: impl FnMut(&Position, f64),
) -> Vec<u64> {
    let mut account = AccountLedger::new(10_000.0);
    let mut sold = Vec::new();
    for i in 0..bars.len() {
        if pos.is_closed() {
            break;
        }
        let Some(tick) = Tick::from_history(bars, i, ladder.config().trailing_ma_period) else {
            continue;
        };
        let stop_before = pos.stop_loss;
        let decision = ladder.evaluate(pos, &tick);
        on_tick(pos, stop_before);
        let exit = match &decision {
            LadderDecision::PartialExit {
                shares,
                price,
                reason,
            } => Some(record_exit(pos, *shares, *price, tick.date, reason, &mut account)),
            LadderDecision::FullExit { price, reason } => {
                Some(record_exit(pos, pos.shares, *price, tick.date, reason, &mut account))
            }
            _ => None,
        };
        if let Some(exit) = exit {
            sold.push(exit.trade.shares);
        }
    }
    sold
}

fn arb_returns() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.08..0.10_f64, 1..120)
}

fn fresh(shares: u64) -> Position {
    Position::open("PROP", start(), 10.0, 9.0, shares, 9.5, 10.5)
}

proptest! {
    // ── 1. Stop ratchet ──────────────────────────────────────────────

    #[test]
    fn stop_never_moves_down(returns in arb_returns(), shares in 1u64..2_000) {
        let ladder = RiskLadder::default();
        let mut pos = fresh(shares);
        let bars = bars_from_returns(&returns);
        replay(&ladder, &mut pos, &bars, |p, before| {
            assert!(p.stop_loss >= before, "stop fell from {before} to {}", p.stop_loss);
        });
    }

    // ── 2. Share conservation ────────────────────────────────────────

    #[test]
    fn shares_are_conserved(returns in arb_returns(), shares in 1u64..2_000) {
        let ladder = RiskLadder::default();
        let mut pos = fresh(shares);
        let bars = bars_from_returns(&returns);
        let sold = replay(&ladder, &mut pos, &bars, |p, _| {
            assert!(p.shares <= p.initial_shares);
        });
        prop_assert_eq!(sold.iter().sum::<u64>() + pos.shares, shares);
        prop_assert_eq!(pos.initial_shares, shares);
    }

    // ── 3. Level ordering and fixed risk ─────────────────────────────

    #[test]
    fn levels_fire_in_order(returns in arb_returns()) {
        let ladder = RiskLadder::default();
        let mut pos = fresh(100);
        let bars = bars_from_returns(&returns);
        replay(&ladder, &mut pos, &bars, |p, _| {
            assert!(!p.profit_taken_l2 || p.profit_taken_l1);
            assert!(!p.profit_taken_l3 || p.profit_taken_l2);
            assert_eq!(p.initial_risk, 1.0);
            assert_eq!(p.initial_stop_loss, 9.0);
        });
    }

    // ── 4. Idempotence ───────────────────────────────────────────────

    #[test]
    fn repeated_tick_is_ignored(returns in arb_returns()) {
        let ladder = RiskLadder::default();
        let bars = bars_from_returns(&returns);
        let mut pos = fresh(100);
        for i in 0..bars.len() {
            let Some(tick) = Tick::from_history(&bars, i, 20) else { continue };
            let decision = ladder.evaluate(&mut pos, &tick);
            let snapshot = pos.clone();
            prop_assert_eq!(ladder.evaluate(&mut pos, &tick), LadderDecision::Ignored);
            prop_assert_eq!(&pos, &snapshot);
            if decision.is_exit() {
                break;
            }
        }
    }

    // ── 5. Straight rally ────────────────────────────────────────────

    #[test]
    fn straight_rally_reaches_level_three(
        returns in prop::collection::vec(0.005..0.08_f64, 200),
    ) {
        let ladder = RiskLadder::default();
        let mut pos = fresh(100);
        // Gapless: each day opens and lows at the prior close.
        let mut bars = bars_from_returns(&returns);
        for bar in &mut bars {
            bar.low = bar.open;
            bar.high = bar.close;
        }
        replay(&ladder, &mut pos, &bars, |_, _| {});
        prop_assert_eq!(pos.status, PositionStatus::MonitoringL3);
        prop_assert!(pos.profit_taken_l3);
        // three quarter tranches, or a 30% strong-EP sale followed by two
        let expected = if pos.strong_ep_taken { 20 } else { 25 };
        prop_assert_eq!(pos.shares, expected);
    }

    // ── 6. Affordability ─────────────────────────────────────────────

    #[test]
    fn entry_cost_fits_cash(
        entry in 2.5..150.0_f64,
        risk_frac in 0.005..0.05_f64,
        account in 1_000.0..100_000.0_f64,
        cash_frac in 0.001..1.0_f64,
    ) {
        let bars: Vec<Bar> = (0..26)
            .map(|i| Bar {
                date: start() + chrono::Duration::days(i),
                open: entry,
                high: entry * if i == 25 { 1.03 } else { 1.02 },
                low: entry * 0.98,
                close: entry * if i == 25 { 1.01 } else { 1.0 },
                volume: if i == 25 { 10_000 } else { 1_000 },
            })
            .collect();
        let candidate = Candidate {
            symbol: "PROP".into(),
            purchase_date: bars[25].date,
            entry_price: entry,
            stop_loss: Some(entry * (1.0 - risk_frac)),
            shares: None,
        };
        let budget = RiskBudget {
            account_value: account,
            risk_per_trade: 0.01,
            available_cash: account * cash_frac,
        };
        if let Ok(plan) = EntryInitializer::default().plan(&candidate, &bars, &budget) {
            prop_assert!(plan.position.shares >= 1);
            prop_assert!(plan.cost() <= budget.available_cash + 1e-6);
            prop_assert!(plan.position.initial_risk > 0.0);
        }
    }
}
