//! End-to-end lifecycles: entry sizing, ladder decisions and exit records
//! wired together the way the drivers use them.

use chrono::NaiveDate;
use pivotlab_core::domain::{Bar, Position, PositionStatus, ProfitLevel};
use pivotlab_core::ledger::AccountLedger;
use pivotlab_core::risk::{
    record_exit, Candidate, EntryInitializer, EntryRejection, ExitReason, LadderConfig,
    LadderDecision, RiskBudget, RiskLadder, Tick,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn tick(day: u32, close: f64, low: f64, high: f64) -> Tick {
    Tick {
        date: d(day),
        close,
        low,
        high,
        trailing_ma: None,
    }
}

/// Apply a decision the way the session does and return the ledger row, if any.
fn act(
    position: &mut Position,
    decision: &LadderDecision,
    date: NaiveDate,
    account: &mut AccountLedger,
) -> Option<pivotlab_core::risk::RecordedExit> {
    match decision {
        LadderDecision::PartialExit {
            shares,
            price,
            reason,
        } => Some(record_exit(position, *shares, *price, date, reason, account)),
        LadderDecision::FullExit { price, reason } => {
            Some(record_exit(position, position.shares, *price, date, reason, account))
        }
        _ => None,
    }
}

// ── Ten-dollar lifecycle ─────────────────────────────────────────────

#[test]
fn breakeven_then_level_one_then_protected_stop() {
    let config = LadderConfig {
        strong_ep_gain: 0.20,
        ..LadderConfig::default()
    };
    let ladder = RiskLadder::new(config);
    let mut account = AccountLedger::new(10_000.0);
    let mut pos = Position::open("ABC", d(4), 10.0, 9.0, 100, 9.2, 10.5);
    account.debit(1_000.0);

    // Day 1: close above stop, low above stop.
    let decision = ladder.evaluate(&mut pos, &tick(4, 9.50, 9.30, 10.10));
    assert_eq!(decision, LadderDecision::Hold { stop_raised: false });
    assert_eq!(pos.days_held, 1);
    assert_eq!(pos.stop_loss, 9.0);

    // Day 2: +2% reached, held two days, stop to breakeven.
    let decision = ladder.evaluate(&mut pos, &tick(5, 10.40, 10.00, 10.45));
    assert_eq!(decision, LadderDecision::Hold { stop_raised: true });
    assert_eq!(pos.stop_loss, 10.0);

    // Day 3: 1.6R, first profit level.
    let decision = ladder.evaluate(&mut pos, &tick(6, 11.60, 10.50, 11.70));
    let LadderDecision::PartialExit { shares, price, .. } = &decision else {
        panic!("expected a partial exit, got {decision:?}");
    };
    assert_eq!((*shares, *price), (25, 11.60));
    let recorded = act(&mut pos, &decision, d(6), &mut account).unwrap();
    assert!(!recorded.closed);
    assert!((recorded.trade.profit_loss - 40.0).abs() < 1e-9);
    assert_eq!(recorded.trade.exit_reason, "Profit Level 1 at 1.60R");
    assert_eq!(pos.shares, 75);
    assert_eq!(pos.status, PositionStatus::MonitoringL1);
    assert!(pos.trailing_stop_mode);

    // Day 4: close through the breakeven stop.
    let decision = ladder.evaluate(&mut pos, &tick(7, 8.50, 8.40, 10.10));
    assert_eq!(
        decision,
        LadderDecision::FullExit {
            price: 10.0,
            reason: ExitReason::TrailingStop
        }
    );
    let recorded = act(&mut pos, &decision, d(7), &mut account).unwrap();
    assert!(recorded.closed);
    assert_eq!(recorded.trade.shares, 75);
    assert!(recorded.trade.is_winner);
    assert_eq!(
        recorded.trade.exit_reason,
        "Trailing Stop Hit (Profit Protected) (Previous partial profits: $40.00)"
    );
    assert!((account.cash() - 10_040.0).abs() < 1e-9);
    assert_eq!(pos.shares, 0);
}

#[test]
fn same_series_under_default_thresholds_takes_strong_ep() {
    let ladder = RiskLadder::default();
    let mut account = AccountLedger::new(10_000.0);
    let mut pos = Position::open("ABC", d(4), 10.0, 9.0, 100, 9.2, 10.5);
    account.debit(1_000.0);

    ladder.evaluate(&mut pos, &tick(4, 9.50, 9.30, 10.10));
    ladder.evaluate(&mut pos, &tick(5, 10.40, 10.00, 10.45));
    let decision = ladder.evaluate(&mut pos, &tick(6, 11.60, 10.50, 11.70));

    let LadderDecision::PartialExit { shares, reason, .. } = &decision else {
        panic!("expected a partial exit, got {decision:?}");
    };
    assert_eq!(*shares, 30);
    assert!(matches!(reason, ExitReason::StrongEp { .. }));
    act(&mut pos, &decision, d(6), &mut account);
    assert_eq!(pos.status, PositionStatus::MonitoringStrongEp);
    assert_eq!(pos.shares, 70);

    // Strong EP took the first rung; a later 1.8R close does not sell.
    let decision = ladder.evaluate(&mut pos, &tick(7, 11.80, 11.40, 11.90));
    assert!(!decision.is_exit());

    // The ladder keeps climbing from the second rung.
    let decision = ladder.evaluate(&mut pos, &tick(8, 13.20, 12.90, 13.30));
    let LadderDecision::PartialExit { shares, reason, .. } = &decision else {
        panic!("expected level two, got {decision:?}");
    };
    assert_eq!(*shares, 25);
    assert!(matches!(
        reason,
        ExitReason::ProfitLevel { level: ProfitLevel::L2, .. }
    ));
    act(&mut pos, &decision, d(8), &mut account);
    assert_eq!(pos.status, PositionStatus::MonitoringL2);
    assert_eq!(pos.shares, 45);
    assert!(pos.stop_loss >= 11.0);
}

#[test]
fn day_one_wick_stops_out_at_the_stop() {
    let ladder = RiskLadder::default();
    let mut account = AccountLedger::new(1_000.0);
    let mut pos = Position::open("ABC", d(4), 10.0, 9.0, 100, 9.2, 10.5);
    account.debit(1_000.0);

    let decision = ladder.evaluate(&mut pos, &tick(4, 9.60, 8.90, 10.20));
    let recorded = act(&mut pos, &decision, d(4), &mut account).unwrap();
    assert!(recorded.closed);
    assert_eq!(recorded.trade.exit_reason, "Stop Loss Hit");
    assert!(!recorded.trade.is_winner);
    assert!((recorded.trade.profit_loss + 100.0).abs() < 1e-9);
    assert!((recorded.trade.risk_reward + 1.0).abs() < 1e-9);
}

// ── Entry sizing ─────────────────────────────────────────────────────

fn three_dollar_history() -> Vec<Bar> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut bars: Vec<Bar> = (0..25)
        .map(|i| Bar {
            date: start + chrono::Duration::days(i),
            open: 3.0,
            high: 3.05,
            low: 2.95,
            close: 3.0,
            volume: 1_000,
        })
        .collect();
    bars.push(Bar {
        date: start + chrono::Duration::days(25),
        open: 3.0,
        high: 3.10,
        low: 2.98,
        close: 3.0,
        volume: 5_000,
    });
    bars
}

fn three_dollar_candidate() -> Candidate {
    Candidate {
        symbol: "LOW".into(),
        purchase_date: NaiveDate::from_ymd_opt(2024, 1, 26).unwrap(),
        entry_price: 3.0,
        stop_loss: Some(2.95),
        shares: None,
    }
}

#[test]
fn tight_stop_sizes_to_risk_budget() {
    let init = EntryInitializer::default();
    let budget = RiskBudget {
        account_value: 10_000.0,
        risk_per_trade: 0.01,
        available_cash: 10_000.0,
    };
    let plan = init
        .plan(&three_dollar_candidate(), &three_dollar_history(), &budget)
        .unwrap();
    assert_eq!(plan.position.shares, 2_000);
    assert!(!plan.cash_limited);
    assert!((plan.cost() - 6_000.0).abs() < 1e-6);
    assert!((plan.position.initial_risk - 0.05).abs() < 1e-9);
}

#[test]
fn shares_never_exceed_what_cash_buys() {
    let init = EntryInitializer::default();
    let budget = RiskBudget {
        account_value: 10_000.0,
        risk_per_trade: 0.01,
        available_cash: 100.0,
    };
    let mut account = AccountLedger::with_cash(10_000.0, 100.0);
    let plan = init
        .open(
            &three_dollar_candidate(),
            &three_dollar_history(),
            &budget,
            &mut account,
        )
        .unwrap();
    assert_eq!(plan.position.shares, 33);
    assert!(plan.cash_limited);
    assert!((account.cash() - 1.0).abs() < 1e-9);
}

#[test]
fn less_than_one_share_of_cash_is_rejected() {
    let init = EntryInitializer::default();
    let budget = RiskBudget {
        account_value: 10_000.0,
        risk_per_trade: 0.01,
        available_cash: 2.5,
    };
    let err = init
        .plan(&three_dollar_candidate(), &three_dollar_history(), &budget)
        .unwrap_err();
    assert!(matches!(err, EntryRejection::Unaffordable { .. }));
}
