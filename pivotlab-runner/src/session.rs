//! Session: the single owner of all mutable trading state.
//!
//! Both clock drivers call into one `Session`. It holds the position store,
//! the account and trade ledgers, the watchlist and the order sink, and is
//! the only place ladder decisions are turned into side effects. Positions
//! are evaluated one after another in symbol order so every decision sees
//! the same account snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{Duration, NaiveDate};
use pivotlab_core::data::{prefetch, DataError, FetchRequest, HistoryCache, MarketDataProvider};
use pivotlab_core::domain::{index_of, last_index_on_or_before, Bar, Position, TradeResult};
use pivotlab_core::indicators::{Indicator, Sma};
use pivotlab_core::ledger::{AccountLedger, TradeLedger};
use pivotlab_core::orders::{OrderSink, SellOrder};
use pivotlab_core::risk::{
    record_exit, Candidate, EntryInitializer, EntryRejection, ExitReason, LadderDecision,
    RiskBudget, RiskLadder, Tick,
};
use pivotlab_core::{PersistenceError, PositionStore, Watchlist};
use tracing::{debug, error, info, warn};

use crate::alerts::{detect, Alert, AlertLog};
use crate::config::AppConfig;
use crate::stats::TradeStats;

/// Where a session persists its state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFiles {
    pub watchlist: PathBuf,
    pub trade_ledger: PathBuf,
}

impl SessionFiles {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            watchlist: config.files.watchlist.clone(),
            trade_ledger: config.files.trade_ledger.clone(),
        }
    }
}

/// What one evaluation pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayReport {
    pub date: Option<NaiveDate>,
    pub evaluated: usize,
    pub exits: Vec<TradeResult>,
    /// Symbols skipped this pass, with the reason.
    pub skipped: Vec<(String, String)>,
    /// Open symbols whose bar for `date` was not there.
    pub awaiting_bar: Vec<String>,
}

impl DayReport {
    /// Every open position either saw its bar for the day or was not due.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.awaiting_bar.is_empty()
    }
}

/// Outcome of an entry pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryReport {
    pub opened: Vec<String>,
    pub rejected: Vec<(String, EntryRejection)>,
}

/// One line of the pre-close summary.
#[derive(Debug, Clone, PartialEq)]
pub struct PreCloseLine {
    pub symbol: String,
    pub price: f64,
    pub r: f64,
    pub stop: f64,
    /// Exit the ladder would take at this price, if any.
    pub recommendation: Option<String>,
    /// Past the no-follow-through day without reaching the minimum R.
    pub weak_momentum: bool,
}

pub struct Session {
    config: AppConfig,
    ladder: RiskLadder,
    entry: EntryInitializer,
    store: PositionStore,
    pending: Vec<Candidate>,
    account: AccountLedger,
    trades: TradeLedger,
    watchlist: Watchlist,
    watchlist_mtime: Option<SystemTime>,
    sink: Box<dyn OrderSink>,
    provider: Arc<dyn MarketDataProvider>,
    history: HistoryCache,
    /// Fixed end of every history fetch (backtest). Live fetches end on the
    /// evaluated date.
    horizon: Option<NaiveDate>,
    alerts: AlertLog,
    completed: Vec<TradeResult>,
}

impl Session {
    /// Build a session and resume whatever the watchlist holds.
    ///
    /// Cash is reconstructed as the starting account plus realized P/L from
    /// the trade ledger, less the cost basis of resumed open shares.
    pub fn new(
        config: AppConfig,
        files: SessionFiles,
        provider: Arc<dyn MarketDataProvider>,
        sink: Box<dyn OrderSink>,
    ) -> Result<Self, PersistenceError> {
        let trades = TradeLedger::new(files.trade_ledger);
        let realized: f64 = trades.read_all()?.iter().map(|t| t.profit_loss).sum();

        let mut session = Self {
            ladder: RiskLadder::new(config.ladder.clone()),
            entry: EntryInitializer::new(config.entry.clone()),
            store: PositionStore::new(),
            pending: Vec::new(),
            account: AccountLedger::new(config.account.account_size),
            trades,
            watchlist: Watchlist::new(files.watchlist),
            watchlist_mtime: None,
            sink,
            provider,
            history: HistoryCache::new(),
            horizon: None,
            alerts: AlertLog::new(),
            completed: Vec::new(),
            config,
        };
        session.sync_watchlist()?;

        let cost_basis: f64 = session
            .store
            .iter()
            .map(|p| p.shares as f64 * p.entry_price)
            .sum();
        let starting = session.config.account.account_size;
        session.account = AccountLedger::with_cash(starting, starting + realized - cost_basis);
        info!(
            open = session.store.len(),
            pending = session.pending.len(),
            cash = session.account.cash(),
            sink = session.sink.name(),
            provider = session.provider.name(),
            "session ready"
        );
        Ok(session)
    }

    // ── Accessors ──

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ladder(&self) -> &RiskLadder {
        &self.ladder
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    pub fn account(&self) -> &AccountLedger {
        &self.account
    }

    pub fn pending(&self) -> &[Candidate] {
        &self.pending
    }

    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    /// Trades recorded by this session, oldest first.
    pub fn completed_trades(&self) -> &[TradeResult] {
        &self.completed
    }

    pub fn trade_ledger(&self) -> &TradeLedger {
        &self.trades
    }

    /// Fetch every history window through `end` instead of through the
    /// evaluated day.
    pub fn set_history_horizon(&mut self, end: Option<NaiveDate>) {
        self.horizon = end;
    }

    // ── Watchlist ──

    /// Pick up rows added to the watchlist since the last look.
    ///
    /// Rows with a status become open positions on first sight; rows
    /// without one join the pending queue. Symbols already handled this run
    /// are left alone. Returns how many rows were picked up.
    pub fn sync_watchlist(&mut self) -> Result<usize, PersistenceError> {
        let mtime = self.watchlist.modified();
        if mtime.is_some() && mtime == self.watchlist_mtime {
            return Ok(0);
        }
        self.watchlist_mtime = mtime;

        let mut added = 0;
        for row in self.watchlist.load()? {
            if self.store.is_processed(&row.symbol)
                || self.pending.iter().any(|c| c.symbol == row.symbol)
            {
                continue;
            }
            if row.is_pending() {
                // purchase date defaults to the day it is first seen
                let today = chrono::Local::now().date_naive();
                if let Some(candidate) = row.to_candidate(today) {
                    debug!(symbol = %candidate.symbol, date = %candidate.purchase_date, "pending candidate");
                    self.pending.push(candidate);
                    added += 1;
                }
            } else if let Some(position) = row.to_position() {
                info!(
                    symbol = %position.symbol,
                    status = %position.status,
                    shares = position.shares,
                    stop = position.stop_loss,
                    days = position.days_held,
                    "resumed position"
                );
                self.store.insert(position);
                added += 1;
            } else {
                warn!(symbol = %row.symbol, status = %row.status_text, "cannot resume watchlist row");
                self.store.mark_processed(&row.symbol);
            }
        }
        self.pending.sort_by(|a, b| {
            a.purchase_date
                .cmp(&b.purchase_date)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(added)
    }

    fn write_through(&self, position: &Position) {
        match self.watchlist.update(position) {
            Ok(()) => {}
            Err(PersistenceError::Conflict { symbol }) => {
                debug!(%symbol, "watchlist row already gone, skipping update");
            }
            Err(e) => error!(symbol = %position.symbol, error = %e, "watchlist update failed"),
        }
    }

    // ── History ──

    fn history_from(&self, purchase_date: NaiveDate) -> NaiveDate {
        purchase_date - Duration::days(i64::from(self.config.data.history_lookback_days))
    }

    fn bars(&self, symbol: &str, from: NaiveDate, through: NaiveDate) -> Result<Arc<Vec<Bar>>, DataError> {
        match self.horizon {
            Some(end) if end >= through => {
                self.history.get_or_fetch(self.provider.as_ref(), symbol, from, end)
            }
            _ => {
                // today's bar may still be forming
                self.history.invalidate(symbol);
                self.history
                    .get_or_fetch(self.provider.as_ref(), symbol, from, through)
            }
        }
    }

    /// Symbols the session will need history for: open positions plus
    /// pending candidates due by `date`.
    fn fetch_plan(&self, date: NaiveDate) -> Vec<FetchRequest> {
        let to = self.horizon.filter(|end| *end >= date).unwrap_or(date);
        let open = self.store.iter().map(|p| (p.symbol.clone(), p.purchase_date));
        let due = self
            .pending
            .iter()
            .filter(|c| c.purchase_date <= date)
            .map(|c| (c.symbol.clone(), c.purchase_date));
        open.chain(due)
            .map(|(symbol, purchase)| FetchRequest {
                symbol,
                from: self.history_from(purchase),
                to,
            })
            .collect()
    }

    /// Warm the history cache for everything due by `date` on a bounded
    /// pool. Failures are logged; the evaluation pass reports them again.
    pub fn prefetch(&self, date: NaiveDate) {
        let requests = self.fetch_plan(date);
        if requests.is_empty() || self.horizon.is_none() {
            return;
        }
        match prefetch(
            self.provider.as_ref(),
            &self.history,
            &requests,
            self.config.data.max_concurrent_fetches,
        ) {
            Ok(outcomes) => {
                for (symbol, outcome) in outcomes {
                    if let Err(e) = outcome {
                        warn!(%symbol, error = %e, "prefetch failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "prefetch pool unavailable"),
        }
    }

    /// Last close on or before `date`, from cached history.
    pub fn last_close(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        let purchase = self.store.get(symbol).map(|p| p.purchase_date).unwrap_or(date);
        let bars = self.bars(symbol, self.history_from(purchase), date).ok()?;
        last_index_on_or_before(&bars, date).map(|i| bars[i].close)
    }

    /// Date of the first bar after `date`. `Ok(None)` means the provider has
    /// nothing later through the history horizon.
    pub fn next_bar_date(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<NaiveDate>, DataError> {
        let Some(end) = self.horizon else {
            return Ok(None);
        };
        let purchase = self.store.get(symbol).map(|p| p.purchase_date).unwrap_or(date);
        let bars = self.bars(symbol, self.history_from(purchase), end)?;
        Ok(bars.iter().map(|b| b.date).find(|d| *d > date))
    }

    /// Cash plus open shares marked at their last close on or before `date`.
    pub fn equity(&self, date: NaiveDate) -> f64 {
        self.account.cash() + self.store.market_value(|symbol| self.last_close(symbol, date))
    }

    // ── Entries ──

    /// Open every pending candidate with a purchase date on or before
    /// `as_of`.
    ///
    /// History trouble is a hard rejection here: the symbol is marked as
    /// processed and not retried.
    pub fn open_pending(&mut self, as_of: NaiveDate) -> EntryReport {
        let mut report = EntryReport::default();
        let (due, later): (Vec<Candidate>, Vec<Candidate>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|c| c.purchase_date <= as_of);
        self.pending = later;

        for candidate in due {
            if self.store.is_processed(&candidate.symbol) {
                continue;
            }
            self.store.mark_processed(&candidate.symbol);

            let budget = RiskBudget {
                account_value: self.equity(candidate.purchase_date),
                risk_per_trade: self.config.account.risk_per_trade,
                available_cash: self.account.cash(),
            };
            let from = self.history_from(candidate.purchase_date);
            let opened = self
                .bars(&candidate.symbol, from, candidate.purchase_date)
                .map_err(|e| EntryRejection::DataUnavailable {
                    symbol: candidate.symbol.clone(),
                    reason: e.to_string(),
                })
                .and_then(|bars| {
                    self.entry
                        .open(&candidate, &bars, &budget, &mut self.account)
                });

            match opened {
                Ok(plan) => {
                    if plan.stop_capped {
                        info!(symbol = %candidate.symbol, stop = plan.position.stop_loss, atr = plan.atr, "stop tightened to ATR limit");
                    }
                    if plan.cash_limited {
                        info!(symbol = %candidate.symbol, shares = plan.position.shares, cash = budget.available_cash, "shares cut to available cash");
                    }
                    self.write_through(&plan.position);
                    self.store.insert(plan.position);
                    report.opened.push(candidate.symbol);
                }
                Err(rejection) => {
                    warn!(symbol = %candidate.symbol, date = %candidate.purchase_date, reason = %rejection, "entry rejected");
                    report.rejected.push((candidate.symbol, rejection));
                }
            }
        }
        report
    }

    // ── Evaluation ──

    /// Authoritative evaluation of every open position against its daily
    /// bar for `date`. Positions without a bar that day are left untouched.
    pub fn process_day(&mut self, date: NaiveDate) -> DayReport {
        let mut report = DayReport {
            date: Some(date),
            ..DayReport::default()
        };
        let ma_period = self.ladder.config().trailing_ma_period;

        for symbol in self.store.symbols() {
            let Some(purchase) = self.store.get(&symbol).map(|p| p.purchase_date) else {
                continue;
            };
            if date < purchase {
                continue;
            }
            let bars = match self.bars(&symbol, self.history_from(purchase), date) {
                Ok(bars) => bars,
                Err(e) => {
                    // transient or not, the position holds until the next pass
                    warn!(%symbol, %date, error = %e, transient = e.is_transient(), "no history, holding");
                    report.skipped.push((symbol, e.to_string()));
                    continue;
                }
            };
            let Some(tick) = index_of(&bars, date).and_then(|i| Tick::from_history(&bars, i, ma_period)) else {
                debug!(%symbol, %date, "no bar for date");
                report.awaiting_bar.push(symbol);
                continue;
            };
            report.evaluated += 1;
            if let Some(trade) = self.apply_tick(&symbol, &tick) {
                report.exits.extend(trade);
            }
        }
        report
    }

    /// Run one tick through the ladder for `symbol` and carry out the
    /// decision. Returns the ledger rows written.
    pub fn apply_tick(&mut self, symbol: &str, tick: &Tick) -> Option<Vec<TradeResult>> {
        let position = self.store.get_mut(symbol)?;
        let decision = self.ladder.evaluate(position, tick);
        if !decision.mutated() {
            return None;
        }
        let (shares, price, reason) = match decision {
            LadderDecision::Ignored => return None,
            LadderDecision::Hold { .. } => {
                let snapshot = position.clone();
                self.write_through(&snapshot);
                return Some(Vec::new());
            }
            LadderDecision::PartialExit {
                shares,
                price,
                reason,
            } => (shares, price, reason),
            LadderDecision::FullExit { price, reason } => (position.shares, price, reason),
        };
        Some(self.exit(symbol, shares, price, tick.date, &reason).into_iter().collect())
    }

    /// Close whatever remains of `symbol` at `price`.
    pub fn force_close(&mut self, symbol: &str, price: f64, date: NaiveDate) -> Option<TradeResult> {
        let shares = self.store.get(symbol)?.shares;
        self.exit(symbol, shares, price, date, &ExitReason::ForceClose)
    }

    fn exit(
        &mut self,
        symbol: &str,
        shares: u64,
        price: f64,
        date: NaiveDate,
        reason: &ExitReason,
    ) -> Option<TradeResult> {
        let position = self.store.get_mut(symbol)?;
        let sold = if reason.is_full() { position.shares } else { shares.min(position.shares) };

        let order = SellOrder {
            symbol: symbol.to_string(),
            shares: sold,
            limit_price: None,
        };
        match self.sink.sell(&order) {
            Ok(conf) => debug!(%symbol, order_id = %conf.order_id, shares = sold, "sell accepted"),
            // the books still record the exit
            Err(e) => error!(%symbol, %date, shares = sold, price, error = %e, "sell order failed"),
        }

        let recorded = record_exit(position, sold, price, date, reason, &mut self.account);
        if let Err(e) = self.trades.append(&recorded.trade) {
            error!(%symbol, error = %e, "trade ledger append failed");
        }

        if recorded.closed {
            self.store.remove(symbol);
            match self.watchlist.remove(symbol) {
                Ok(true) => {}
                Ok(false) => debug!(%symbol, "watchlist row already gone"),
                Err(e) => error!(%symbol, error = %e, "watchlist remove failed"),
            }
            info!(
                %symbol,
                %date,
                cash = self.account.cash(),
                open = self.store.len(),
                "position closed"
            );
            self.log_stats();
        } else if let Some(position) = self.store.get(symbol) {
            self.write_through(position);
        }

        self.completed.push(recorded.trade.clone());
        Some(recorded.trade)
    }

    fn log_stats(&self) {
        match self.trades.read_all() {
            Ok(trades) => {
                let stats = TradeStats::compute(&trades, self.config.account.account_size);
                info!(
                    trades = stats.total_trades,
                    win_rate = stats.win_rate,
                    avg_winner_r = stats.avg_winner_r,
                    avg_loser_r = stats.avg_loser_r,
                    total_pnl = stats.total_pnl,
                    return_pct = stats.return_pct,
                    "ledger stats"
                );
            }
            Err(e) => warn!(error = %e, "could not read trade ledger for stats"),
        }
    }

    // ── Intraday ──

    fn intraday_tick(&self, symbol: &str, date: NaiveDate) -> Result<(Position, Tick), DataError> {
        let position = self
            .store
            .get(symbol)
            .cloned()
            .ok_or_else(|| DataError::Other(format!("{symbol} is not open")))?;
        let price = self.provider.current_price(symbol)?;
        let prior = date - Duration::days(1);
        let ma = self
            .bars(symbol, self.history_from(position.purchase_date), prior)
            .ok()
            .and_then(|bars| {
                let idx = last_index_on_or_before(&bars, prior)?;
                Sma::new(self.ladder.config().trailing_ma_period).value_at(&bars, idx)
            });
        Ok((position, Tick::intraday(date, price, ma)))
    }

    /// Dry-run every open position against its latest price and raise
    /// alerts. Never changes state.
    pub fn monitor_intraday(&mut self, date: NaiveDate) -> Vec<Alert> {
        self.alerts.prune_before(date);
        let mut fresh = Vec::new();
        for symbol in self.store.symbols() {
            let (position, tick) = match self.intraday_tick(&symbol, date) {
                Ok(t) => t,
                Err(e) => {
                    warn!(%symbol, %date, error = %e, "no intraday price");
                    continue;
                }
            };
            let (_, decision) = self.ladder.preview(&position, &tick);
            for kind in detect(&position, &decision, tick.close, tick.trailing_ma, &self.config.live) {
                let alert = Alert {
                    symbol: symbol.clone(),
                    date,
                    kind,
                    price: tick.close,
                    stop: position.stop_loss,
                };
                if self.alerts.raise(alert.clone()) {
                    fresh.push(alert);
                }
            }
        }
        fresh
    }

    /// Sell or hold recommendation per open position at the latest price.
    pub fn pre_close_report(&self, date: NaiveDate) -> Vec<PreCloseLine> {
        let cfg = self.ladder.config();
        let mut lines = Vec::new();
        for symbol in self.store.symbols() {
            let (position, tick) = match self.intraday_tick(&symbol, date) {
                Ok(t) => t,
                Err(e) => {
                    warn!(%symbol, %date, error = %e, "no price for pre-close check");
                    continue;
                }
            };
            let (after, decision) = self.ladder.preview(&position, &tick);
            let r = position.r_multiple(tick.close);
            let recommendation = match &decision {
                LadderDecision::FullExit { reason, .. } => Some(format!("SELL ALL: {}", reason.describe())),
                LadderDecision::PartialExit { shares, reason, .. } => {
                    Some(format!("SELL {shares}: {}", reason.describe()))
                }
                _ => None,
            };
            lines.push(PreCloseLine {
                symbol,
                price: tick.close,
                r,
                stop: after.stop_loss,
                recommendation,
                weak_momentum: after.days_held >= cfg.no_follow_through_days
                    && !position.profit_taken()
                    && r < cfg.no_follow_through_min_r,
            });
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotlab_core::data::MemoryProvider;
    use pivotlab_core::orders::PaperSink;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn bar(date: NaiveDate, close: f64, low: f64, high: f64) -> Bar {
        Bar {
            date,
            open: close,
            high,
            low,
            close,
            volume: 1_000,
        }
    }

    /// Flat $10 history through Mar 1 and the four-day lifecycle after it.
    fn provider() -> Arc<MemoryProvider> {
        let mut bars: Vec<Bar> = (0..30)
            .map(|i| bar(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap() + Duration::days(i), 10.0, 9.5, 10.5))
            .collect();
        bars.push(bar(d(4), 9.50, 9.30, 10.10));
        bars.push(bar(d(5), 10.40, 10.00, 10.45));
        bars.push(bar(d(6), 11.60, 10.50, 11.70));
        bars.push(bar(d(7), 8.50, 8.40, 10.10));
        let provider = MemoryProvider::new();
        provider.insert("ABC", bars);
        Arc::new(provider)
    }

    fn session(dir: &std::path::Path) -> Session {
        let watchlist = dir.join("watchlist.csv");
        std::fs::write(
            &watchlist,
            "stock_symbol,entry_price,stop_loss_price,shares,date,status,days_held\n\
             ABC,10.00,9.00,100,2024-03-04,HOLDING,0\n",
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.ladder.strong_ep_gain = 0.20;
        let files = SessionFiles {
            watchlist,
            trade_ledger: dir.join("trades.csv"),
        };
        Session::new(config, files, provider(), Box::new(PaperSink::new())).unwrap()
    }

    #[test]
    fn resumes_open_rows_and_reconstructs_cash() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        assert_eq!(s.store().len(), 1);
        assert!((s.account().cash() - 9_000.0).abs() < 1e-9);
    }

    #[test]
    fn process_day_carries_out_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());

        assert!(s.process_day(d(4)).exits.is_empty());
        assert!(s.process_day(d(5)).exits.is_empty());
        assert_eq!(s.store().get("ABC").unwrap().stop_loss, 10.0);

        let day3 = s.process_day(d(6));
        assert_eq!(day3.exits.len(), 1);
        assert_eq!(day3.exits[0].shares, 25);

        let day4 = s.process_day(d(7));
        assert_eq!(day4.exits.len(), 1);
        assert!(day4.exits[0].is_winner);
        assert!(s.store().is_empty());
        assert!((s.account().cash() - 10_040.0).abs() < 1e-9);

        assert_eq!(s.trade_ledger().read_all().unwrap().len(), 2);
        assert_eq!(s.completed_trades().len(), 2);
        let rows = Watchlist::new(dir.path().join("watchlist.csv")).load().unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn re_processing_a_day_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        s.process_day(d(4));
        let before = s.store().get("ABC").cloned();
        let again = s.process_day(d(4));
        assert!(again.exits.is_empty());
        assert_eq!(s.store().get("ABC").cloned(), before);
    }

    #[test]
    fn intraday_preview_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let before = s.store().get("ABC").cloned();
        // latest close in memory is $8.50, under the stop
        let alerts = s.monitor_intraday(d(4));
        assert!(!alerts.is_empty());
        assert_eq!(s.store().get("ABC").cloned(), before);
        assert!(s.completed_trades().is_empty());

        let lines = s.pre_close_report(d(4));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].recommendation.as_deref().unwrap_or("").starts_with("SELL ALL"));
    }
}
