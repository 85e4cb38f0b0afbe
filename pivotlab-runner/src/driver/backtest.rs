//! Backtest driver: replays history one calendar day at a time.
//!
//! Every open position with a bar on the current day is evaluated with that
//! bar; days without a bar (weekends, holidays, gaps) leave it untouched. A
//! symbol whose data runs out is force-closed at its last close, and so is
//! everything still open when the iteration bound is hit.

use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use super::{ClockDriver, RunError, RunSummary, Tally};
use crate::config::BacktestConfig;
use crate::session::Session;

pub struct BacktestDriver {
    config: BacktestConfig,
}

impl BacktestDriver {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// First day that has anything to do: the earliest pending purchase or
    /// the day after an open position was last evaluated.
    fn first_day(&self, session: &Session) -> Option<NaiveDate> {
        if self.config.start.is_some() {
            return self.config.start;
        }
        let pending = session.pending().iter().map(|c| c.purchase_date);
        let open = session.store().iter().map(|p| {
            p.last_check_date
                .and_then(|d| d.succ_opt())
                .unwrap_or(p.purchase_date)
        });
        pending.chain(open).min()
    }

    fn last_day(&self, start: NaiveDate) -> NaiveDate {
        self.config.end.unwrap_or_else(|| {
            let bound = start + Duration::days(i64::from(self.config.max_iterations));
            bound.min(chrono::Local::now().date_naive())
        })
    }

    /// Force-close every open symbol with no bar within `max_gap_days`
    /// after `date`.
    fn close_exhausted(&self, session: &mut Session, date: NaiveDate, tally: &mut Tally) {
        let max_gap = i64::from(self.config.max_gap_days);
        for symbol in session.store().symbols() {
            let started = session
                .store()
                .get(&symbol)
                .is_some_and(|p| p.purchase_date <= date);
            if !started {
                continue;
            }
            let exhausted = match session.next_bar_date(&symbol, date) {
                Ok(None) => true,
                Ok(Some(next)) => (next - date).num_days() > max_gap,
                Err(e) => {
                    // look again tomorrow
                    warn!(%symbol, %date, error = %e, transient = e.is_transient(), "look-ahead failed, holding");
                    false
                }
            };
            if exhausted {
                self.force_close(session, &symbol, date, tally);
            }
        }
    }

    fn force_close(&self, session: &mut Session, symbol: &str, date: NaiveDate, tally: &mut Tally) {
        let Some(price) = session.last_close(symbol, date) else {
            warn!(%symbol, %date, "no close to force-close at, leaving open");
            return;
        };
        if session.force_close(symbol, price, date).is_some() {
            info!(%symbol, %date, price, "force closed, end of data");
            tally.forced(symbol.to_string());
        }
    }
}

impl ClockDriver for BacktestDriver {
    fn name(&self) -> &'static str {
        "backtest"
    }

    fn run(&mut self, session: &mut Session) -> Result<RunSummary, RunError> {
        let mut tally = Tally::default();
        let Some(start) = self.first_day(session) else {
            info!("nothing pending or open, backtest has no work");
            return Ok(tally.finish(self.name(), session));
        };
        let end = self.last_day(start);
        session.set_history_horizon(Some(end));
        session.prefetch(end);
        info!(%start, %end, open = session.store().len(), pending = session.pending().len(), "backtest started");

        let mut date = start;
        let mut iterations = 0u32;
        while date <= end && iterations < self.config.max_iterations {
            tally.entries(&session.open_pending(date));
            let report = session.process_day(date);
            if report.evaluated > 0 || !report.exits.is_empty() {
                debug!(%date, evaluated = report.evaluated, exits = report.exits.len(), "day processed");
            }
            tally.day(&report);
            self.close_exhausted(session, date, &mut tally);

            if session.store().is_empty() && session.pending().is_empty() {
                break;
            }
            let Some(next) = date.succ_opt() else { break };
            date = next;
            iterations += 1;
        }

        let last = date.min(end);
        for symbol in session.store().symbols() {
            self.force_close(session, &symbol, last, &mut tally);
        }
        for candidate in session.pending() {
            warn!(symbol = %candidate.symbol, date = %candidate.purchase_date, "candidate never reached");
        }

        let summary = tally.finish(self.name(), session);
        info!(
            days = summary.days_processed,
            opened = summary.entries_opened,
            exits = summary.exits,
            cash = summary.final_cash,
            "backtest finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::{Datelike, Weekday};
    use pivotlab_core::data::{DataError, MarketDataProvider, MemoryProvider};
    use pivotlab_core::domain::Bar;
    use pivotlab_core::orders::PaperSink;

    use crate::config::AppConfig;
    use crate::session::SessionFiles;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    /// Fails the next `failures` history fetches, then serves `inner`.
    struct Flaky {
        inner: MemoryProvider,
        failures: AtomicUsize,
    }

    impl MarketDataProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn daily_bars(
            &self,
            symbol: &str,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<Bar>, DataError> {
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(DataError::Timeout(format!("{symbol} history")));
            }
            self.inner.daily_bars(symbol, from, to)
        }

        fn current_price(&self, symbol: &str) -> Result<f64, DataError> {
            self.inner.current_price(symbol)
        }
    }

    fn flat_weekdays(through: NaiveDate) -> Vec<Bar> {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .iter_days()
            .take_while(|date| *date <= through)
            .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
            .map(|date| Bar {
                date,
                open: 10.0,
                high: 10.1,
                low: 9.5,
                close: 10.0,
                volume: 1_000,
            })
            .collect()
    }

    #[test]
    fn failed_look_ahead_holds_instead_of_force_closing() {
        let dir = tempfile::tempdir().unwrap();
        let watchlist = dir.path().join("watchlist.csv");
        std::fs::write(
            &watchlist,
            "stock_symbol,entry_price,stop_loss_price,shares,date,status,days_held\n\
             ABC,10.00,9.00,100,2024-03-04,HOLDING,0\n",
        )
        .unwrap();
        let files = SessionFiles {
            watchlist,
            trade_ledger: dir.path().join("trade_results.csv"),
        };
        let inner = MemoryProvider::new();
        inner.insert("ABC", flat_weekdays(d(8)));
        let provider = Arc::new(Flaky {
            inner,
            failures: AtomicUsize::new(0),
        });
        let mut session = Session::new(
            AppConfig::default(),
            files,
            provider.clone(),
            Box::new(PaperSink::new()),
        )
        .unwrap();

        session.set_history_horizon(Some(d(5)));
        assert_eq!(session.process_day(d(4)).evaluated, 1);

        // widening the horizon misses the cache and the refetch times out
        session.set_history_horizon(Some(d(8)));
        provider.failures.store(1, Ordering::SeqCst);
        let driver = BacktestDriver::new(BacktestConfig::default());
        let mut tally = Tally::default();
        driver.close_exhausted(&mut session, d(4), &mut tally);

        assert!(session.store().contains("ABC"));
        assert!(tally.force_closed.is_empty());
        assert!(session.completed_trades().is_empty());

        // the next look succeeds and finds Tuesday's bar
        driver.close_exhausted(&mut session, d(4), &mut tally);
        assert!(session.store().contains("ABC"));
        assert_eq!(session.next_bar_date("ABC", d(4)).unwrap(), Some(d(5)));
    }

    #[test]
    fn configured_end_wins_over_iteration_bound() {
        let driver = BacktestDriver::new(BacktestConfig {
            end: Some(d(20)),
            ..BacktestConfig::default()
        });
        assert_eq!(driver.last_day(d(1)), d(20));
    }

    #[test]
    fn iteration_bound_caps_the_calendar() {
        let driver = BacktestDriver::new(BacktestConfig {
            max_iterations: 10,
            ..BacktestConfig::default()
        });
        assert_eq!(driver.last_day(d(1)), d(11));
    }
}
