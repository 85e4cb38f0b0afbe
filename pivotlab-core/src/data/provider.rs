//! Market data provider trait and structured error types.
//!
//! The risk engine never talks to a vendor directly. Live monitoring plugs in
//! the Yahoo provider, backtests plug in a pre-loaded historical provider, and
//! tests plug in an in-memory one.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::Bar;

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("insufficient history for {symbol}: need {needed} bars, have {available}")]
    InsufficientHistory {
        symbol: String,
        needed: usize,
        available: usize,
    },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("no cached data for symbol '{symbol}', run `pivotlab download {symbol}` first")]
    NoCachedData { symbol: String },

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether the failure may clear up on a later attempt.
    ///
    /// Transient errors degrade to "hold, retry next tick"; the rest are
    /// reported and the symbol is skipped.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_)
                | DataError::Timeout(_)
                | DataError::RateLimited { .. }
                | DataError::CircuitBreakerTripped
        )
    }
}

/// Trait for market data providers.
///
/// `daily_bars` must return bars in ascending date order; consumers still
/// run them through [`crate::domain::normalize_bars`].
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Daily OHLCV bars for `symbol` with `from <= date <= to`.
    fn daily_bars(&self, symbol: &str, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<Bar>, DataError>;

    /// Latest traded price for `symbol`.
    fn current_price(&self, symbol: &str) -> Result<f64, DataError>;

    /// Whether the provider is currently accepting requests.
    fn is_available(&self) -> bool {
        true
    }
}

/// Progress callback for multi-symbol operations.
pub trait DownloadProgress: Send + Sync {
    /// Called when starting to fetch a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol fetch completes.
    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<(), DataError>);

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl DownloadProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Fetching {symbol}...", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<(), DataError>,
    ) {
        match result {
            Ok(()) => println!("  OK: {symbol}"),
            Err(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nDownload complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(DataError::Timeout("x".into()).is_transient());
        assert!(DataError::RateLimited { retry_after_secs: 5 }.is_transient());
        assert!(!DataError::SymbolNotFound {
            symbol: "ZZZ".into()
        }
        .is_transient());
        assert!(!DataError::ValidationError("bad".into()).is_transient());
    }
}
