//! pivotlab CLI: live monitoring, backtests, data download and reports.
//!
//! Commands:
//! - `live`: follow market hours and manage the watchlist's positions
//! - `backtest`: replay the watchlist against cached history
//! - `download`: fetch daily bars from Yahoo Finance into the Parquet cache
//! - `stats`: trade statistics from the trade ledger
//! - `status`: open positions with unrealized P/L at the last cached close

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pivotlab_core::data::{
    download_symbols, CircuitBreaker, MarketDataProvider, MemoryProvider, ParquetCache,
    RateLimiter, StdoutProgress, YahooProvider, YahooSettings,
};
use pivotlab_core::ledger::TradeLedger;
use pivotlab_core::orders::{ManualSink, OrderSink, PaperSink};
use pivotlab_core::Watchlist;
use pivotlab_runner::export::write_artifacts;
use pivotlab_runner::{
    AppConfig, BacktestDriver, ClockDriver, LiveDriver, RunSummary, Session, SessionFiles,
    SystemClock, TradeStats,
};

#[derive(Parser)]
#[command(
    name = "pivotlab",
    about = "pivotlab: episodic-pivot position risk management"
)]
struct Cli {
    /// Path to a TOML config file. Defaults and environment apply without one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor open positions through market hours until terminated.
    Live {
        /// Stop after this many polling cycles.
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Replay the watchlist against cached history.
    Backtest {
        /// First day to replay (YYYY-MM-DD). Defaults to the earliest purchase date.
        #[arg(long)]
        start: Option<String>,

        /// Last day to replay (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,

        /// Output directory for run artifacts. Defaults to `files.report_dir`.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Download daily bars from Yahoo Finance and cache as Parquet.
    Download {
        /// Symbols to download. Defaults to every watchlist symbol.
        symbols: Vec<String>,

        /// Start date (YYYY-MM-DD). Defaults to 2 years ago.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Force re-download even if cached.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Trade statistics from the trade ledger.
    Stats,
    /// Open positions with unrealized P/L.
    Status {
        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Live { max_cycles } => run_live(config, max_cycles),
        Commands::Backtest {
            start,
            end,
            output_dir,
        } => run_backtest(config, start, end, output_dir),
        Commands::Download {
            symbols,
            start,
            end,
            force,
        } => run_download(&config, symbols, start, end, force),
        Commands::Stats => run_stats(&config),
        Commands::Status { json } => run_status(&config, json),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pivotlab=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
        })
        .transpose()
}

fn yahoo(config: &AppConfig) -> Result<YahooProvider> {
    let data = &config.data;
    let provider = YahooProvider::new(
        Arc::new(CircuitBreaker::default_provider()),
        Arc::new(RateLimiter::new(Duration::from_millis(
            data.min_request_spacing_ms,
        ))),
        YahooSettings {
            timeout: Duration::from_secs(data.request_timeout_secs),
            max_retries: data.max_retries,
            ..YahooSettings::default()
        },
    )?;
    Ok(provider)
}

fn watchlist_symbols(path: &Path) -> Result<Vec<String>> {
    let mut symbols: Vec<String> = Watchlist::new(path)
        .load()?
        .into_iter()
        .map(|row| row.symbol)
        .collect();
    symbols.sort();
    symbols.dedup();
    Ok(symbols)
}

// ─── live ───────────────────────────────────────────────────────────

fn run_live(mut config: AppConfig, max_cycles: Option<u64>) -> Result<()> {
    if max_cycles.is_some() {
        config.live.max_cycles = max_cycles;
    }
    let sink: Box<dyn OrderSink> = if config.live.auto_execute {
        Box::new(PaperSink::new())
    } else {
        Box::new(ManualSink::new())
    };
    let provider: Arc<dyn MarketDataProvider> = Arc::new(yahoo(&config)?);
    let files = SessionFiles::from_config(&config);
    let live = config.live.clone();

    let mut session = Session::new(config, files, provider, sink)?;
    let mut driver = LiveDriver::new(SystemClock, &live)?;
    let summary = driver.run(&mut session)?;
    print_summary(&summary);
    Ok(())
}

// ─── backtest ───────────────────────────────────────────────────────

fn run_backtest(
    mut config: AppConfig,
    start: Option<String>,
    end: Option<String>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    if let Some(start) = parse_date(start.as_deref())? {
        config.backtest.start = Some(start);
    }
    if let Some(end) = parse_date(end.as_deref())? {
        config.backtest.end = Some(end);
    }
    if let (Some(s), Some(e)) = (config.backtest.start, config.backtest.end) {
        if s > e {
            bail!("--start {s} is after --end {e}");
        }
    }

    let source = &config.files.watchlist;
    if !source.exists() {
        bail!("watchlist not found: {}", source.display());
    }
    let symbols = watchlist_symbols(source)?;

    let provider = match &config.data.csv_dir {
        Some(dir) => MemoryProvider::load_csv_dir(dir)?,
        None => {
            let cache = ParquetCache::new(&config.data.cache_dir);
            let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
            MemoryProvider::from_cache(&cache, &refs)
        }
    };

    // replay on a copy so the live watchlist and ledger stay untouched
    let output_dir = output_dir.unwrap_or_else(|| config.files.report_dir.clone());
    let run_dir = output_dir.join(format!(
        "backtest_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create {}", run_dir.display()))?;
    let files = SessionFiles {
        watchlist: run_dir.join("watchlist.csv"),
        trade_ledger: run_dir.join("trade_results.csv"),
    };
    std::fs::copy(source, &files.watchlist)
        .with_context(|| format!("failed to copy {}", source.display()))?;

    let backtest = config.backtest.clone();
    let mut session = Session::new(config, files, Arc::new(provider), Box::new(PaperSink::new()))?;
    let summary = BacktestDriver::new(backtest).run(&mut session)?;

    print_summary(&summary);
    write_artifacts(&summary, session.completed_trades(), &run_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

// ─── download ───────────────────────────────────────────────────────

fn run_download(
    config: &AppConfig,
    symbols: Vec<String>,
    start: Option<String>,
    end: Option<String>,
    force: bool,
) -> Result<()> {
    let today = chrono::Local::now().date_naive();
    let start_date = parse_date(start.as_deref())?
        .unwrap_or_else(|| today - chrono::Duration::days(365 * 2));
    let end_date = parse_date(end.as_deref())?.unwrap_or(today);

    let symbols = if symbols.is_empty() {
        watchlist_symbols(&config.files.watchlist)?
    } else {
        symbols.into_iter().map(|s| s.to_ascii_uppercase()).collect()
    };
    if symbols.is_empty() {
        bail!("no symbols given and the watchlist is empty");
    }

    let provider = yahoo(config)?;
    let cache = ParquetCache::new(&config.data.cache_dir);
    let sym_refs: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();

    let summary = download_symbols(
        &provider,
        &cache,
        &sym_refs,
        start_date,
        end_date,
        force,
        &StdoutProgress,
    );

    if !summary.all_succeeded() {
        for (sym, err) in &summary.errors {
            eprintln!("Error for {sym}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

// ─── stats / status ─────────────────────────────────────────────────

fn run_stats(config: &AppConfig) -> Result<()> {
    let ledger = TradeLedger::new(&config.files.trade_ledger);
    let trades = ledger.read_all()?;
    if trades.is_empty() {
        println!("No trades in {}", ledger.path().display());
        return Ok(());
    }
    let stats = TradeStats::compute(&trades, config.account.account_size);
    println!();
    println!("=== Trade Statistics ===");
    println!("{stats}");
    println!();
    Ok(())
}

fn run_status(config: &AppConfig, json: bool) -> Result<()> {
    let rows = Watchlist::new(&config.files.watchlist).load()?;
    let cache = ParquetCache::new(&config.data.cache_dir);

    let mut lines = Vec::new();
    let mut pending = Vec::new();
    for row in rows {
        let Some(pos) = row.to_position() else {
            if row.is_pending() {
                pending.push(row.symbol);
            }
            continue;
        };
        let last_close = cache
            .load(&pos.symbol)
            .ok()
            .and_then(|bars| bars.last().map(|b| b.close));
        lines.push((pos, last_close));
    }

    if json {
        let positions: Vec<serde_json::Value> = lines
            .iter()
            .map(|(pos, close)| {
                serde_json::json!({
                    "symbol": pos.symbol,
                    "status": pos.status.label(),
                    "purchase_date": pos.purchase_date,
                    "days_held": pos.days_held,
                    "shares": pos.shares,
                    "entry_price": pos.entry_price,
                    "stop_loss": pos.stop_loss,
                    "last_close": close,
                    "unrealized_pnl": close.map(|c| pos.unrealized_pnl(c)),
                    "r_multiple": close.map(|c| pos.r_multiple(c)),
                    "cumulative_profit": pos.cumulative_profit,
                })
            })
            .collect();
        let out = serde_json::json!({ "positions": positions, "pending": pending });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if lines.is_empty() {
        println!("No open positions in {}", config.files.watchlist.display());
    } else {
        println!(
            "{:<8} {:<22} {:>6} {:>9} {:>9} {:>9} {:>10} {:>6}",
            "Symbol", "Status", "Shares", "Entry", "Stop", "Close", "P/L", "R"
        );
        println!("{}", "-".repeat(86));
        for (pos, close) in &lines {
            let (close_s, pnl_s, r_s) = match close {
                Some(c) => (
                    format!("{c:.2}"),
                    format!("{:.2}", pos.unrealized_pnl(*c)),
                    format!("{:.2}", pos.r_multiple(*c)),
                ),
                None => ("-".into(), "-".into(), "-".into()),
            };
            println!(
                "{:<8} {:<22} {:>6} {:>9.2} {:>9.2} {:>9} {:>10} {:>6}",
                pos.symbol,
                pos.status.label(),
                pos.shares,
                pos.entry_price,
                pos.stop_loss,
                close_s,
                pnl_s,
                r_s
            );
        }
    }
    if !pending.is_empty() {
        println!();
        println!("Pending: {}", pending.join(", "));
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    info!(mode = %summary.mode, days = summary.days_processed, "run complete");
    println!();
    println!("=== {} run ===", summary.mode);
    if let (Some(start), Some(end)) = (summary.start, summary.end) {
        println!("Period:         {start} to {end}");
    }
    println!("Days:           {}", summary.days_processed);
    println!(
        "Entries:        {} opened, {} rejected",
        summary.entries_opened, summary.entries_rejected
    );
    println!("Exits:          {}", summary.exits);
    if !summary.force_closed.is_empty() {
        println!("Force closed:   {}", summary.force_closed.join(", "));
    }
    if !summary.open_positions.is_empty() {
        println!("Still open:     {}", summary.open_positions.join(", "));
    }
    println!("Final cash:     ${:.2}", summary.final_cash);
    println!();
    println!("--- Trades ---");
    println!("{}", summary.stats);
    println!();
}
