//! Market data: provider boundary, Yahoo client, caches and test sources.

pub mod cache;
pub mod circuit_breaker;
pub mod download;
pub mod history;
pub mod memory;
pub mod prefetch;
pub mod provider;
pub mod rate_limit;
pub mod synthetic;
pub mod yahoo;

pub use cache::{CacheMeta, CacheStatus, CoverageResult, ParquetCache};
pub use circuit_breaker::CircuitBreaker;
pub use download::{download_symbols, DownloadSummary};
pub use history::HistoryCache;
pub use memory::MemoryProvider;
pub use prefetch::{prefetch, FetchRequest};
pub use provider::{DataError, DownloadProgress, MarketDataProvider, StdoutProgress};
pub use rate_limit::RateLimiter;
pub use yahoo::{YahooProvider, YahooSettings};
