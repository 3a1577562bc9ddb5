//! Minute candle backfill engine.
//!
//! Current implemented scope:
//! - gap scanning over stored minute history
//! - bounded range fetching from a paginated market data provider
//! - reconciliation of fetched windows against stored boundaries (gap-fill, catch-up)
//! - per-coin backfill runs on a bounded worker pool, with SQLite and CryptoCompare defaults

mod backfill;
mod candle;
mod config;
mod gap_scan;
mod market_data;
mod observability;
mod range_fetch;
mod reconcile;
mod store;

pub use backfill::{BackfillError, BackfillMode, BackfillOrchestrator, BackfillReport, CoinOutcome};
pub use candle::{
    percent_change, Candle, Coin, Gap, InvalidCandle, StoredCandle, StoredCandleRef, PAGE_LIMIT,
    STEP_SECONDS,
};
pub use config::{
    backfill_config_from_env, provider_config_from_env, run_config_from_env, BackfillConfig,
    ProviderConfig, RunConfig, RunMode,
};
pub use gap_scan::{find_gaps, gaps_in_timestamps};
pub use market_data::{CryptoCompareClient, MarketDataClient, ProviderError};
pub use observability::{
    init_logging, log_app_start, log_run_summary, log_store_opened, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use range_fetch::{fetch_range, plan_fetch_chunks, FetchChunk, RangeFetchError};
pub use reconcile::{build_insert_batch, reconcile, Boundary, CatchUpAnchor, InsertBatch};
pub use store::{CandleStore, CoinRegistry, InMemoryCandleStore, SqliteCandleStore, StoreError};
