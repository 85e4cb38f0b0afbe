//! Reporting and export: JSON summary, trade CSV and a Markdown report.
//!
//! The JSON summary carries a `schema_version`; unknown versions are
//! rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use pivotlab_core::domain::TradeResult;

use crate::driver::{RunSummary, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("failed to serialize run summary to JSON")
}

/// Deserialize a `RunSummary`, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<RunSummary> {
    let summary: RunSummary =
        serde_json::from_str(json).context("failed to deserialize run summary from JSON")?;
    if summary.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            summary.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(summary)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Trades in the ledger's own column layout.
pub fn export_trades_csv(trades: &[TradeResult]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for t in trades {
        wtr.serialize(t)?;
    }
    let bytes = wtr.into_inner().context("failed to flush trade CSV")?;
    String::from_utf8(bytes).context("trade CSV is not UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the artifact set for one run.
///
/// Creates `{mode}_{timestamp}/` under `output_dir` containing
/// `summary.json`, `trades.csv` and `report.md`, and returns its path.
pub fn save_artifacts(
    summary: &RunSummary,
    trades: &[TradeResult],
    output_dir: &Path,
) -> Result<PathBuf> {
    let dirname = format!(
        "{}_{}",
        summary.mode,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;
    write_artifacts(summary, trades, &run_dir)?;
    Ok(run_dir)
}

/// Write the artifact set into an existing directory.
pub fn write_artifacts(summary: &RunSummary, trades: &[TradeResult], run_dir: &Path) -> Result<()> {
    std::fs::write(run_dir.join("summary.json"), export_json(summary)?)?;
    std::fs::write(run_dir.join("trades.csv"), export_trades_csv(trades)?)?;
    std::fs::write(run_dir.join("report.md"), generate_report(summary, trades))?;
    Ok(())
}

pub fn load_summary(dir: &Path) -> Result<RunSummary> {
    let path = dir.join("summary.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

pub fn generate_report(summary: &RunSummary, trades: &[TradeResult]) -> String {
    let mut md = String::with_capacity(2048);

    md.push_str("# Run Report\n\n");

    md.push_str("## Run\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Mode | {} |\n", summary.mode));
    md.push_str(&format!(
        "| Period | {} to {} |\n",
        fmt_date(summary.start),
        fmt_date(summary.end)
    ));
    md.push_str(&format!("| Days | {} |\n", summary.days_processed));
    md.push_str(&format!(
        "| Entries | {} opened, {} rejected |\n",
        summary.entries_opened, summary.entries_rejected
    ));
    md.push_str(&format!("| Final Cash | ${:.2} |\n", summary.final_cash));
    if !summary.force_closed.is_empty() {
        md.push_str(&format!(
            "| Force Closed | {} |\n",
            summary.force_closed.join(", ")
        ));
    }
    if !summary.open_positions.is_empty() {
        md.push_str(&format!(
            "| Still Open | {} |\n",
            summary.open_positions.join(", ")
        ));
    }
    md.push('\n');

    let s = &summary.stats;
    md.push_str("## Performance Summary\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Trades | {} |\n", s.total_trades));
    md.push_str(&format!("| Win Rate | {:.1}% |\n", s.win_rate * 100.0));
    md.push_str(&format!("| Avg Winner | {:.2}R |\n", s.avg_winner_r));
    md.push_str(&format!("| Avg Loser | {:.2}R |\n", s.avg_loser_r));
    md.push_str(&format!("| Total P/L | ${:.2} |\n", s.total_pnl));
    md.push_str(&format!("| Return | {:.2}% |\n", s.return_pct * 100.0));
    md.push('\n');

    if !trades.is_empty() {
        md.push_str("## Trades\n\n");
        md.push_str("| Symbol | Exit Date | Shares | Exit | P/L | R | Reason |\n");
        md.push_str("| --- | --- | ---: | ---: | ---: | ---: | --- |\n");
        for t in trades {
            md.push_str(&format!(
                "| {} | {} | {} | ${:.2} | ${:.2} | {:.2} | {} |\n",
                t.symbol, t.exit_date, t.shares, t.exit_price, t.profit_loss, t.risk_reward, t.exit_reason
            ));
        }
        md.push('\n');
    }

    md
}

fn fmt_date(date: Option<chrono::NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
}
