//! Splits a time window into provider-sized requests and stitches the
//! results back into one ascending candle sequence.

use thiserror::Error;
use tracing::{debug, info};

use crate::candle::{Candle, PAGE_LIMIT, STEP_SECONDS};
use crate::market_data::{MarketDataClient, ProviderError};

#[derive(Debug, Error)]
pub enum RangeFetchError {
    #[error("invalid fetch range: to_time {to_time} must be after from_time {from_time}")]
    InvalidRange { from_time: i64, to_time: i64 },
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchChunk {
    pub to_timestamp: i64,
    pub limit: usize,
}

pub fn plan_fetch_chunks(from_time: i64, to_time: i64) -> Vec<FetchChunk> {
    if to_time <= from_time {
        return Vec::new();
    }

    let page_span = PAGE_LIMIT as i64 * STEP_SECONDS;
    let mut chunks = Vec::new();
    let mut chunk_to = to_time;

    loop {
        let steps = (chunk_to - from_time) / STEP_SECONDS;
        if steps > PAGE_LIMIT as i64 {
            chunks.push(FetchChunk {
                to_timestamp: chunk_to,
                limit: PAGE_LIMIT,
            });
            chunk_to -= page_span;
        } else {
            chunks.push(FetchChunk {
                to_timestamp: chunk_to,
                limit: steps.max(0) as usize,
            });
            break;
        }
    }

    chunks.reverse();
    chunks
}

pub fn fetch_range(
    client: &dyn MarketDataClient,
    symbol: &str,
    from_time: i64,
    to_time: i64,
) -> Result<Vec<Candle>, RangeFetchError> {
    if to_time <= from_time {
        return Err(RangeFetchError::InvalidRange { from_time, to_time });
    }

    let chunks = plan_fetch_chunks(from_time, to_time);
    let mut out: Vec<Candle> = Vec::new();
    let mut overlap_removed = 0usize;

    for chunk in &chunks {
        let fetched = client.fetch_minute_candles(symbol, chunk.limit, Some(chunk.to_timestamp))?;
        if fetched.is_empty() {
            return Err(ProviderError::Empty {
                symbol: symbol.to_string(),
            }
            .into());
        }

        debug!(
            component = "range_fetch",
            event = "range_fetch.chunk",
            symbol,
            to_timestamp = chunk.to_timestamp,
            limit = chunk.limit,
            returned = fetched.len()
        );

        out.reserve(fetched.len());
        for candle in fetched {
            let is_new = out
                .last()
                .map(|last: &Candle| candle.time > last.time)
                .unwrap_or(true);
            if is_new {
                out.push(candle);
            } else {
                overlap_removed += 1;
            }
        }
    }

    info!(
        component = "range_fetch",
        event = "range_fetch.finish",
        symbol,
        from_time,
        to_time,
        calls = chunks.len(),
        candles = out.len(),
        overlap_removed
    );

    Ok(out)
}
