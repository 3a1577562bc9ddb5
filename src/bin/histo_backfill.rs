use std::sync::Arc;

use chrono::{TimeZone, Utc};
use histo_backfill::{
    backfill_config_from_env, init_logging, log_app_start, log_store_opened,
    logging_config_from_env, provider_config_from_env, run_config_from_env, BackfillError,
    BackfillOrchestrator, BackfillReport, CandleStore, CoinRegistry, CryptoCompareClient,
    RunMode, SqliteCandleStore,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;

    let backfill_cfg = backfill_config_from_env();
    let provider_cfg = provider_config_from_env();
    let run_cfg = run_config_from_env();
    log_app_start(&logging, run_cfg.mode, &backfill_cfg, &provider_cfg);

    let store = Arc::new(SqliteCandleStore::open(&run_cfg.store_path)?);
    for symbol in &run_cfg.seed_symbols {
        store.register_coin(symbol)?;
    }
    let tracked = store.list_tracked_coins()?;
    log_store_opened(&run_cfg.store_path, tracked.len());

    if tracked.is_empty() {
        println!(
            "No tracked coins in {}. Set BACKFILL_SYMBOLS=BTC,ETH to register some.",
            run_cfg.store_path.display()
        );
        return Ok(());
    }

    let client = Arc::new(CryptoCompareClient::new(provider_cfg)?);
    let orchestrator =
        BackfillOrchestrator::new(store.clone(), store.clone(), client.clone(), backfill_cfg)?;

    println!(
        "Backfill start | store={} mode={} coins={} workers={}",
        run_cfg.store_path.display(),
        run_cfg.mode.as_str(),
        tracked.len(),
        backfill_cfg.concurrency
    );

    let result = match run_cfg.mode {
        RunMode::Gaps => orchestrator.backfill_gaps().map(|report| vec![report]),
        RunMode::Recent => orchestrator.backfill_recent().map(|report| vec![report]),
        RunMode::All => orchestrator.backfill_all(),
    };

    match result {
        Ok(reports) => {
            for report in &reports {
                print_report(store.as_ref(), report);
            }
            println!("\nProvider calls: {}", client.calls_made());
            Ok(())
        }
        Err(BackfillError::ApiUnavailable {
            failed_coins,
            first,
            reports,
        }) => {
            for report in &reports {
                print_report(store.as_ref(), report);
            }
            println!("\nProvider calls: {}", client.calls_made());
            Err(format!(
                "market data unavailable for {failed_coins} coin(s); first failure: {first}"
            )
            .into())
        }
        Err(err) => Err(err.into()),
    }
}

fn print_report(store: &SqliteCandleStore, report: &BackfillReport) {
    println!("\n=== {} ===", report.mode.as_str());
    for outcome in &report.coins {
        let newest = store
            .last_timestamp(outcome.coin.id)
            .ok()
            .flatten()
            .map(format_ts)
            .unwrap_or_else(|| "-".to_string());

        println!(
            "  {} | gaps={} missing={} windows={} inserted={} rejected={} provider_failures={} newest={}",
            outcome.coin.symbol,
            outcome.gaps_found,
            outcome.missing_points,
            outcome.windows_fetched,
            outcome.inserted,
            outcome.rejected,
            outcome.provider_failures,
            newest
        );
        if outcome.degraded_catch_up {
            println!("    catch-up anchor not found in provider window");
        }
        if let Some(err) = &outcome.storage_error {
            println!("    storage error: {err}");
        }
    }
    println!(
        "TOTAL | inserted={} rejected={} provider_failures={} storage_failures={}",
        report.total_inserted(),
        report.total_rejected(),
        report.total_provider_failures(),
        report.storage_failures()
    );
}

fn format_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
