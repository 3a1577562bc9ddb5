//! Per-coin backfill runs: interior gap-fill and tail catch-up over every
//! tracked coin, on a bounded worker pool.

use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::candle::{Coin, PAGE_LIMIT};
use crate::config::BackfillConfig;
use crate::gap_scan::find_gaps;
use crate::market_data::{MarketDataClient, ProviderError};
use crate::observability::log_run_summary;
use crate::range_fetch::{fetch_range, RangeFetchError};
use crate::reconcile::{reconcile, Boundary, CatchUpAnchor};
use crate::store::{CandleStore, CoinRegistry, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillMode {
    GapFill,
    CatchUp,
}

impl BackfillMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GapFill => "gap_fill",
            Self::CatchUp => "catch_up",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoinOutcome {
    pub coin: Coin,
    pub gaps_found: usize,
    pub missing_points: u64,
    pub windows_fetched: usize,
    pub inserted: usize,
    pub rejected: usize,
    pub provider_failures: usize,
    pub first_provider_error: Option<String>,
    pub storage_error: Option<String>,
    pub degraded_catch_up: bool,
}

impl CoinOutcome {
    fn new(coin: Coin) -> Self {
        Self {
            coin,
            gaps_found: 0,
            missing_points: 0,
            windows_fetched: 0,
            inserted: 0,
            rejected: 0,
            provider_failures: 0,
            first_provider_error: None,
            storage_error: None,
            degraded_catch_up: false,
        }
    }

    fn record_provider_failure(&mut self, err: &ProviderError) {
        self.provider_failures += 1;
        if self.first_provider_error.is_none() {
            self.first_provider_error = Some(err.to_string());
        }
    }

    fn record_storage_error(&mut self, mode: BackfillMode, err: &StoreError) {
        warn!(
            component = "backfill",
            event = "backfill.coin.storage_failed",
            mode = mode.as_str(),
            coin_id = self.coin.id,
            symbol = %self.coin.symbol,
            error = %err
        );
        self.storage_error = Some(err.to_string());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillReport {
    pub mode: BackfillMode,
    pub coins: Vec<CoinOutcome>,
}

impl BackfillReport {
    pub fn total_inserted(&self) -> usize {
        self.coins.iter().map(|c| c.inserted).sum()
    }

    pub fn total_rejected(&self) -> usize {
        self.coins.iter().map(|c| c.rejected).sum()
    }

    pub fn total_provider_failures(&self) -> usize {
        self.coins.iter().map(|c| c.provider_failures).sum()
    }

    pub fn storage_failures(&self) -> usize {
        self.coins.iter().filter(|c| c.storage_error.is_some()).count()
    }

    pub fn first_provider_failure(&self) -> Option<String> {
        self.coins.iter().find_map(|c| {
            c.first_provider_error
                .as_ref()
                .map(|err| format!("{}: {}", c.coin.symbol, err))
        })
    }

    fn coins_with_provider_failures(&self) -> usize {
        self.coins.iter().filter(|c| c.provider_failures > 0).count()
    }
}

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("failed to list tracked coins: {0}")]
    Registry(#[source] StoreError),
    #[error("failed to build backfill worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("market data unavailable for {failed_coins} coin(s); first failure: {first}")]
    ApiUnavailable {
        failed_coins: usize,
        first: String,
        reports: Vec<BackfillReport>,
    },
}

pub struct BackfillOrchestrator {
    registry: Arc<dyn CoinRegistry>,
    store: Arc<dyn CandleStore>,
    client: Arc<dyn MarketDataClient>,
    pool: rayon::ThreadPool,
}

impl BackfillOrchestrator {
    pub fn new(
        registry: Arc<dyn CoinRegistry>,
        store: Arc<dyn CandleStore>,
        client: Arc<dyn MarketDataClient>,
        config: BackfillConfig,
    ) -> Result<Self, BackfillError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency.max(1))
            .thread_name(|index| format!("backfill-{index}"))
            .build()?;

        Ok(Self {
            registry,
            store,
            client,
            pool,
        })
    }

    pub fn backfill_gaps(&self) -> Result<BackfillReport, BackfillError> {
        self.run(BackfillMode::GapFill, Self::fill_coin_gaps)
    }

    pub fn backfill_recent(&self) -> Result<BackfillReport, BackfillError> {
        self.run(BackfillMode::CatchUp, Self::catch_up_coin)
    }

    // Catch-up runs even when gap-fill reports unavailable market data.
    pub fn backfill_all(&self) -> Result<Vec<BackfillReport>, BackfillError> {
        let gaps = match self.backfill_gaps() {
            Err(err @ BackfillError::Registry(_)) => return Err(err),
            other => other,
        };
        let recent = self.backfill_recent();

        match (gaps, recent) {
            (Ok(gaps), Ok(recent)) => Ok(vec![gaps, recent]),
            (
                Err(BackfillError::ApiUnavailable {
                    failed_coins,
                    first,
                    mut reports,
                }),
                recent,
            ) => {
                reports.extend(finished_reports(recent));
                Err(BackfillError::ApiUnavailable {
                    failed_coins,
                    first,
                    reports,
                })
            }
            (
                Ok(gaps),
                Err(BackfillError::ApiUnavailable {
                    failed_coins,
                    first,
                    reports,
                }),
            ) => {
                let mut all = vec![gaps];
                all.extend(reports);
                Err(BackfillError::ApiUnavailable {
                    failed_coins,
                    first,
                    reports: all,
                })
            }
            (Err(err), _) | (_, Err(err)) => Err(err),
        }
    }

    fn run<F>(&self, mode: BackfillMode, per_coin: F) -> Result<BackfillReport, BackfillError>
    where
        F: Fn(&Self, &Coin) -> CoinOutcome + Sync,
    {
        let coins = self
            .registry
            .list_tracked_coins()
            .map_err(BackfillError::Registry)?;

        info!(
            component = "backfill",
            event = "backfill.run.start",
            mode = mode.as_str(),
            coins = coins.len(),
            workers = self.pool.current_num_threads()
        );

        let dispatch = tracing::dispatcher::get_default(|current| current.clone());
        let outcomes: Vec<CoinOutcome> = self.pool.install(|| {
            coins
                .par_iter()
                .map(|coin| tracing::dispatcher::with_default(&dispatch, || per_coin(self, coin)))
                .collect()
        });

        let report = BackfillReport {
            mode,
            coins: outcomes,
        };
        log_run_summary(&report);

        match report.first_provider_failure() {
            Some(first) => Err(BackfillError::ApiUnavailable {
                failed_coins: report.coins_with_provider_failures(),
                first,
                reports: vec![report],
            }),
            None => Ok(report),
        }
    }

    fn fill_coin_gaps(&self, coin: &Coin) -> CoinOutcome {
        let mode = BackfillMode::GapFill;
        let mut outcome = CoinOutcome::new(coin.clone());

        let gaps = match find_gaps(self.store.as_ref(), coin.id) {
            Ok(gaps) => gaps,
            Err(err) => {
                outcome.record_storage_error(mode, &err);
                return outcome;
            }
        };
        outcome.gaps_found = gaps.len();
        outcome.missing_points = gaps.iter().map(|g| g.missing_points()).sum();

        for gap in &gaps {
            let fetched = match fetch_range(
                self.client.as_ref(),
                &coin.symbol,
                gap.from_time,
                gap.to_time,
            ) {
                Ok(fetched) => fetched,
                Err(RangeFetchError::ProviderUnavailable(err)) => {
                    warn!(
                        component = "backfill",
                        event = "backfill.gap.provider_unavailable",
                        coin_id = coin.id,
                        symbol = %coin.symbol,
                        from_time = gap.from_time,
                        to_time = gap.to_time,
                        error = %err
                    );
                    outcome.record_provider_failure(&err);
                    continue;
                }
                Err(err @ RangeFetchError::InvalidRange { .. }) => {
                    warn!(
                        component = "backfill",
                        event = "backfill.gap.skipped",
                        coin_id = coin.id,
                        symbol = %coin.symbol,
                        error = %err
                    );
                    continue;
                }
            };
            outcome.windows_fetched += 1;

            let batch = reconcile(
                coin.id,
                &fetched,
                Boundary::GapFill {
                    from_time: gap.from_time,
                    to_time: gap.to_time,
                },
            );
            outcome.rejected += batch.rejected.len();

            let inserted = match self.store.insert_batch(coin.id, &batch.rows) {
                Ok(inserted) => inserted,
                Err(err) => {
                    outcome.record_storage_error(mode, &err);
                    return outcome;
                }
            };
            outcome.inserted += inserted;

            info!(
                component = "backfill",
                event = "backfill.gap.fetched",
                coin_id = coin.id,
                symbol = %coin.symbol,
                from_time = gap.from_time,
                to_time = gap.to_time,
                fetched = fetched.len(),
                inserted,
                rejected = batch.rejected.len()
            );
        }

        log_coin_finish(mode, &outcome);
        outcome
    }

    fn catch_up_coin(&self, coin: &Coin) -> CoinOutcome {
        let mode = BackfillMode::CatchUp;
        let mut outcome = CoinOutcome::new(coin.clone());

        let fetched = match self
            .client
            .fetch_minute_candles(&coin.symbol, PAGE_LIMIT, None)
            .and_then(|fetched| {
                if fetched.is_empty() {
                    Err(ProviderError::Empty {
                        symbol: coin.symbol.clone(),
                    })
                } else {
                    Ok(fetched)
                }
            }) {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(
                    component = "backfill",
                    event = "backfill.catch_up.provider_unavailable",
                    coin_id = coin.id,
                    symbol = %coin.symbol,
                    error = %err
                );
                outcome.record_provider_failure(&err);
                return outcome;
            }
        };
        outcome.windows_fetched = 1;

        let last_known_time = match self.store.last_timestamp(coin.id) {
            Ok(last) => last,
            Err(err) => {
                outcome.record_storage_error(mode, &err);
                return outcome;
            }
        };

        let batch = reconcile(coin.id, &fetched, Boundary::CatchUp { last_known_time });
        if batch.anchor == CatchUpAnchor::NotFound {
            warn!(
                component = "backfill",
                event = "backfill.catch_up.degraded.anchor_missing",
                coin_id = coin.id,
                symbol = %coin.symbol,
                last_known_time = ?last_known_time,
                window_start = ?fetched.first().map(|c| c.time)
            );
            outcome.degraded_catch_up = true;
        }
        outcome.rejected = batch.rejected.len();

        match self.store.insert_batch(coin.id, &batch.rows) {
            Ok(inserted) => outcome.inserted = inserted,
            Err(err) => {
                outcome.record_storage_error(mode, &err);
                return outcome;
            }
        }

        log_coin_finish(mode, &outcome);
        outcome
    }
}

fn finished_reports(result: Result<BackfillReport, BackfillError>) -> Vec<BackfillReport> {
    match result {
        Ok(report) => vec![report],
        Err(BackfillError::ApiUnavailable { reports, .. }) => reports,
        Err(_) => Vec::new(),
    }
}

fn log_coin_finish(mode: BackfillMode, outcome: &CoinOutcome) {
    info!(
        component = "backfill",
        event = "backfill.coin.finish",
        mode = mode.as_str(),
        coin_id = outcome.coin.id,
        symbol = %outcome.coin.symbol,
        gaps = outcome.gaps_found,
        missing_points = outcome.missing_points,
        windows = outcome.windows_fetched,
        inserted = outcome.inserted,
        rejected = outcome.rejected,
        provider_failures = outcome.provider_failures,
        degraded = outcome.degraded_catch_up
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(symbol: &str, inserted: usize, provider_error: Option<&str>) -> CoinOutcome {
        let mut out = CoinOutcome::new(Coin::new(0, symbol));
        out.inserted = inserted;
        if let Some(err) = provider_error {
            out.provider_failures = 1;
            out.first_provider_error = Some(err.to_string());
        }
        out
    }

    #[test]
    fn report_totals_sum_over_coins() {
        let mut eth = outcome("ETH", 3, Some("timeout"));
        eth.rejected = 2;
        eth.storage_error = Some("disk full".to_string());
        let report = BackfillReport {
            mode: BackfillMode::GapFill,
            coins: vec![outcome("BTC", 5, None), eth],
        };

        assert_eq!(report.total_inserted(), 8);
        assert_eq!(report.total_rejected(), 2);
        assert_eq!(report.total_provider_failures(), 1);
        assert_eq!(report.storage_failures(), 1);
    }

    #[test]
    fn first_provider_failure_follows_registry_order() {
        let report = BackfillReport {
            mode: BackfillMode::CatchUp,
            coins: vec![
                outcome("BTC", 1, None),
                outcome("ETH", 0, Some("rate limit")),
                outcome("SOL", 0, Some("timeout")),
            ],
        };

        assert_eq!(
            report.first_provider_failure().as_deref(),
            Some("ETH: rate limit")
        );
        assert_eq!(report.coins_with_provider_failures(), 2);
    }

    #[test]
    fn clean_report_has_no_provider_failure() {
        let report = BackfillReport {
            mode: BackfillMode::GapFill,
            coins: vec![outcome("BTC", 1, None)],
        };
        assert_eq!(report.first_provider_failure(), None);
        assert_eq!(BackfillMode::GapFill.as_str(), "gap_fill");
    }
}
