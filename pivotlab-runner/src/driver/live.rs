//! Live driver: a polling loop keyed to market hours.
//!
//! - Regular session: intraday previews and alerts against the latest price.
//! - Last minutes before the close: a one-off sell/hold summary.
//! - Shortly after the close: the authoritative evaluation on the day's
//!   official bar. This is the only phase that changes positions.
//!
//! The loop stops only at `max_cycles` or when the process is terminated.

use std::sync::Mutex;

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use tracing::{debug, error, info, warn};

use super::{ClockDriver, RunError, RunSummary, Tally};
use crate::config::{ConfigError, LiveConfig};
use crate::session::Session;

/// Source of "now" and of waiting.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
    fn sleep(&self, duration: std::time::Duration);
}

/// Local wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep(&self, duration: std::time::Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when told to. Sleeping advances it.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: std::time::Duration) {
        let step = Duration::from_std(duration).unwrap_or_else(|_| Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += step;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Closed,
    Regular,
    PreClose,
    PostClose,
}

/// Market-hours windows for one trading day. Weekends are closed.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSchedule {
    open: NaiveTime,
    close: NaiveTime,
    pre_close: Duration,
    post_close_delay: Duration,
    post_close_window: Duration,
}

impl MarketSchedule {
    pub fn from_config(live: &LiveConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            open: live.open_time()?,
            close: live.close_time()?,
            pre_close: Duration::minutes(i64::from(live.pre_close_minutes)),
            post_close_delay: Duration::minutes(i64::from(live.post_close_delay_minutes)),
            post_close_window: Duration::minutes(i64::from(live.post_close_window_minutes)),
        })
    }

    pub fn phase(&self, at: NaiveDateTime) -> SessionPhase {
        if matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
            return SessionPhase::Closed;
        }
        let day = at.date();
        let open = day.and_time(self.open);
        let close = day.and_time(self.close);
        let pre_close = close - self.pre_close;
        let post_start = close + self.post_close_delay;
        let post_end = post_start + self.post_close_window;

        if at >= open && at < pre_close {
            SessionPhase::Regular
        } else if at >= pre_close && at < close {
            SessionPhase::PreClose
        } else if at >= post_start && at < post_end {
            SessionPhase::PostClose
        } else {
            SessionPhase::Closed
        }
    }
}

pub struct LiveDriver<C: Clock> {
    clock: C,
    schedule: MarketSchedule,
    interval: std::time::Duration,
    max_cycles: Option<u64>,
    pre_close_done: Option<NaiveDate>,
    post_close_done: Option<NaiveDate>,
    tally: Tally,
}

impl<C: Clock> LiveDriver<C> {
    pub fn new(clock: C, live: &LiveConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            clock,
            schedule: MarketSchedule::from_config(live)?,
            interval: live.check_interval(),
            max_cycles: live.max_cycles,
            pre_close_done: None,
            post_close_done: None,
            tally: Tally::default(),
        })
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// One polling cycle at the clock's current time.
    pub fn cycle(&mut self, session: &mut Session) -> SessionPhase {
        let now = self.clock.now();
        let today = now.date();
        let phase = self.schedule.phase(now);

        if phase != SessionPhase::Closed {
            match session.sync_watchlist() {
                Ok(0) => {}
                Ok(n) => info!(added = n, "watchlist changed"),
                Err(e) => error!(error = %e, "watchlist reload failed"),
            }
        }

        match phase {
            SessionPhase::Closed => debug!(%now, "market closed"),
            SessionPhase::Regular => {
                if let Some(yesterday) = today.pred_opt() {
                    self.tally.entries(&session.open_pending(yesterday));
                }
                session.monitor_intraday(today);
            }
            SessionPhase::PreClose => {
                session.monitor_intraday(today);
                if self.pre_close_done != Some(today) {
                    self.pre_close_done = Some(today);
                    pre_close_summary(session, today);
                }
            }
            SessionPhase::PostClose => {
                if self.post_close_done != Some(today) {
                    self.tally.entries(&session.open_pending(today));
                    let report = session.process_day(today);
                    if report.is_complete() {
                        self.post_close_done = Some(today);
                        info!(
                            date = %today,
                            evaluated = report.evaluated,
                            exits = report.exits.len(),
                            cash = session.account().cash(),
                            "end-of-day evaluation"
                        );
                    } else {
                        // positions already evaluated today ignore the rerun
                        warn!(
                            date = %today,
                            evaluated = report.evaluated,
                            awaiting = ?report.awaiting_bar,
                            skipped = report.skipped.len(),
                            "daily bars incomplete, retrying next cycle"
                        );
                    }
                    self.tally.day(&report);
                }
            }
        }
        phase
    }
}

fn pre_close_summary(session: &Session, date: NaiveDate) {
    let lines = session.pre_close_report(date);
    info!(%date, positions = lines.len(), "pre-close check");
    for line in lines {
        match &line.recommendation {
            Some(action) => warn!(symbol = %line.symbol, price = line.price, r = line.r, stop = line.stop, "pre-close: {action}"),
            None => info!(symbol = %line.symbol, price = line.price, r = line.r, stop = line.stop, "pre-close: hold"),
        }
        if line.weak_momentum {
            warn!(symbol = %line.symbol, r = line.r, "weak momentum, consider exiting");
        }
    }
}

impl<C: Clock> ClockDriver for LiveDriver<C> {
    fn name(&self) -> &'static str {
        "live"
    }

    fn run(&mut self, session: &mut Session) -> Result<RunSummary, RunError> {
        session.set_history_horizon(None);
        info!(
            interval_secs = self.interval.as_secs(),
            max_cycles = ?self.max_cycles,
            open = session.store().len(),
            pending = session.pending().len(),
            "live monitoring started"
        );
        let mut cycles = 0u64;
        loop {
            self.cycle(session);
            cycles += 1;
            if self.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            self.clock.sleep(self.interval);
        }
        let tally = std::mem::take(&mut self.tally);
        Ok(tally.finish(self.name(), session))
    }
}
