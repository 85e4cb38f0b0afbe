//! Concurrent history prefetch on a private, bounded rayon pool.
//!
//! Fetches are idempotent and land in the shared [`HistoryCache`]; the
//! provider's own rate limiter keeps the upstream request rate bounded no
//! matter how many workers run.

use super::history::HistoryCache;
use super::provider::{DataError, MarketDataProvider};
use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, warn};

/// One history window to warm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub symbol: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Warm `history` for every request using at most `max_concurrent` threads.
///
/// Returns per-symbol outcomes in request order. A failed symbol never stops
/// the others.
pub fn prefetch(
    provider: &dyn MarketDataProvider,
    history: &HistoryCache,
    requests: &[FetchRequest],
    max_concurrent: usize,
) -> Result<Vec<(String, Result<usize, DataError>)>, DataError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_concurrent.max(1))
        .thread_name(|i| format!("pivotlab-fetch-{i}"))
        .build()
        .map_err(|e| DataError::Other(format!("failed to build fetch pool: {e}")))?;

    let outcomes: Vec<(String, Result<usize, DataError>)> = pool.install(|| {
        requests
            .par_iter()
            .map(|req| {
                let outcome = history
                    .get_or_fetch(provider, &req.symbol, req.from, req.to)
                    .map(|bars| bars.len());
                match &outcome {
                    Ok(n) => debug!(symbol = %req.symbol, bars = n, "prefetched"),
                    Err(e) => warn!(symbol = %req.symbol, error = %e, "prefetch failed"),
                }
                (req.symbol.clone(), outcome)
            })
            .collect()
    });

    Ok(outcomes)
}
