//! Download orchestrator: multi-symbol fetch into the Parquet cache with
//! progress reporting.

use super::cache::{CoverageResult, ParquetCache};
use super::provider::{DataError, DownloadProgress, MarketDataProvider};
use crate::domain::normalize_bars;
use chrono::NaiveDate;
use tracing::info;

/// Download `symbols` for `[start, end]` and cache them.
///
/// Symbols already fully cached are skipped unless `force` is set. Once the
/// provider stops accepting requests the remaining symbols are marked failed
/// without being attempted.
pub fn download_symbols(
    provider: &dyn MarketDataProvider,
    cache: &ParquetCache,
    symbols: &[&str],
    start: NaiveDate,
    end: NaiveDate,
    force: bool,
    progress: &dyn DownloadProgress,
) -> DownloadSummary {
    let total = symbols.len();
    let mut succeeded = 0;
    let mut failed = 0;
    let mut errors: Vec<(String, DataError)> = Vec::new();

    for (i, symbol) in symbols.iter().enumerate() {
        progress.on_start(symbol, i, total);

        if !force && cache.covers_range(symbol, start, end) == CoverageResult::FullyCovered {
            progress.on_complete(symbol, i, total, &Ok(()));
            succeeded += 1;
            continue;
        }

        let result = download_single(provider, cache, symbol, start, end);
        progress.on_complete(symbol, i, total, &result.as_ref().map(|_| ()).map_err(clone_error));

        match result {
            Ok(count) => {
                info!(symbol, bars = count, "cached history");
                succeeded += 1;
            }
            Err(e) => {
                errors.push((symbol.to_string(), e));
                failed += 1;
            }
        }

        if !provider.is_available() {
            for sym in &symbols[(i + 1)..total] {
                errors.push((sym.to_string(), DataError::CircuitBreakerTripped));
                failed += 1;
            }
            break;
        }
    }

    progress.on_batch_complete(succeeded, failed, total);

    DownloadSummary {
        total,
        succeeded,
        failed,
        errors,
    }
}

fn download_single(
    provider: &dyn MarketDataProvider,
    cache: &ParquetCache,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<usize, DataError> {
    let bars = normalize_bars(provider.daily_bars(symbol, start, end)?);
    if bars.is_empty() {
        return Err(DataError::InsufficientHistory {
            symbol: symbol.to_string(),
            needed: 1,
            available: 0,
        });
    }
    cache.write(symbol, &bars, provider.name())?;
    Ok(bars.len())
}

// DataError is not Clone; progress reporters only need the message.
fn clone_error(e: &DataError) -> DataError {
    match e {
        DataError::SymbolNotFound { symbol } => DataError::SymbolNotFound {
            symbol: symbol.clone(),
        },
        DataError::CircuitBreakerTripped => DataError::CircuitBreakerTripped,
        other => DataError::Other(other.to_string()),
    }
}

/// Summary of a batch download operation.
#[derive(Debug)]
pub struct DownloadSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(String, DataError)>,
}

impl DownloadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
