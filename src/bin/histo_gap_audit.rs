use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use histo_backfill::{find_gaps, run_config_from_env, CoinRegistry, SqliteCandleStore};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct GapRecord<'a> {
    coin_id: i64,
    symbol: &'a str,
    from_time: i64,
    to_time: i64,
    from_utc: String,
    to_utc: String,
    missing_points: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let run_cfg = run_config_from_env();
    let csv_path = std::env::var("BACKFILL_AUDIT_CSV")
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from);

    let store = SqliteCandleStore::open(&run_cfg.store_path)?;
    let coins = store.list_tracked_coins()?;

    println!(
        "Gap audit | store={} coins={}",
        run_cfg.store_path.display(),
        coins.len()
    );

    let mut writer = match &csv_path {
        Some(path) => Some(csv::Writer::from_path(path)?),
        None => None,
    };

    let mut total_gaps = 0usize;
    let mut total_missing = 0u64;
    for coin in &coins {
        let gaps = find_gaps(&store, coin.id)?;
        let missing: u64 = gaps.iter().map(|g| g.missing_points()).sum();
        total_gaps += gaps.len();
        total_missing += missing;

        println!(
            "  {} | gaps={} missing={}",
            coin.symbol,
            gaps.len(),
            missing
        );

        for gap in &gaps {
            let record = GapRecord {
                coin_id: coin.id,
                symbol: &coin.symbol,
                from_time: gap.from_time,
                to_time: gap.to_time,
                from_utc: format_ts(gap.from_time),
                to_utc: format_ts(gap.to_time),
                missing_points: gap.missing_points(),
            };
            match writer.as_mut() {
                Some(w) => w.serialize(&record)?,
                None => println!(
                    "    {} -> {} missing={}",
                    record.from_utc, record.to_utc, record.missing_points
                ),
            }
        }
    }

    if let Some(mut w) = writer {
        w.flush()?;
    }
    if let Some(path) = &csv_path {
        println!("Gap ranges written to {}", path.display());
    }

    println!("TOTAL | gaps={} missing={}", total_gaps, total_missing);
    Ok(())
}

fn format_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
