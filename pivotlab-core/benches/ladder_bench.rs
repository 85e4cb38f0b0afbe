//! Criterion benchmarks for the risk ladder hot path.
//!
//! Benchmarks:
//! 1. Ladder replay over a long synthetic series (evaluate + record)
//! 2. Intraday preview (evaluate on a cloned position)
//! 3. Trailing MA lookup per tick

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use pivotlab_core::data::synthetic::{random_walk, SyntheticParams};
use pivotlab_core::domain::{Bar, Position};
use pivotlab_core::ledger::AccountLedger;
use pivotlab_core::risk::{record_exit, LadderDecision, RiskLadder, Tick};

// ── Helpers ──────────────────────────────────────────────────────────

fn series(days: i64) -> Vec<Bar> {
    let start = NaiveDate::from_ymd_opt(2015, 1, 2).unwrap();
    let params = SyntheticParams {
        drift: 0.002,
        ..SyntheticParams::default()
    };
    random_walk(42, start, start + chrono::Duration::days(days), &params)
}

fn open_on(bars: &[Bar]) -> Position {
    let first = &bars[0];
    Position::open(
        "BENCH",
        first.date,
        first.close,
        first.close * 0.9,
        1_000,
        first.low,
        first.high,
    )
}

/// Evaluate every bar, re-entering whenever the position closes.
fn replay(ladder: &RiskLadder, bars: &[Bar], ticks: &[Tick]) -> usize {
    let mut account = AccountLedger::new(1_000_000.0);
    let mut pos = open_on(bars);
    let mut exits = 0;
    for (i, tick) in ticks.iter().enumerate() {
        if pos.is_closed() {
            pos = open_on(&bars[i..]);
        }
        match ladder.evaluate(&mut pos, tick) {
            LadderDecision::PartialExit { shares, price, reason } => {
                record_exit(&mut pos, shares, price, tick.date, &reason, &mut account);
                exits += 1;
            }
            LadderDecision::FullExit { price, reason } => {
                let shares = pos.shares;
                record_exit(&mut pos, shares, price, tick.date, &reason, &mut account);
                exits += 1;
            }
            _ => {}
        }
    }
    exits
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_replay(c: &mut Criterion) {
    let ladder = RiskLadder::default();
    let mut group = c.benchmark_group("ladder_replay");
    for days in [365_i64, 3_650] {
        let bars = series(days);
        let ticks: Vec<Tick> = (0..bars.len())
            .filter_map(|i| Tick::from_history(&bars, i, 20))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(days), &ticks, |b, ticks| {
            b.iter(|| replay(&ladder, black_box(&bars), black_box(ticks)))
        });
    }
    group.finish();
}

fn bench_preview(c: &mut Criterion) {
    let ladder = RiskLadder::default();
    let bars = series(60);
    let pos = open_on(&bars);
    let tick = Tick::intraday(bars[10].date, bars[10].close * 1.2, Some(bars[10].close));
    c.bench_function("ladder_preview", |b| {
        b.iter(|| ladder.preview(black_box(&pos), black_box(&tick)))
    });
}

fn bench_tick_from_history(c: &mut Criterion) {
    let bars = series(3_650);
    let last = bars.len() - 1;
    c.bench_function("tick_from_history_sma20", |b| {
        b.iter(|| Tick::from_history(black_box(&bars), black_box(last), 20))
    });
}

criterion_group!(benches, bench_replay, bench_preview, bench_tick_from_history);
criterion_main!(benches);
