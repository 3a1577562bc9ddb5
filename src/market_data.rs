//! Minute candle provider: the `MarketDataClient` seam and its CryptoCompare
//! `histominute` implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::candle::{Candle, PAGE_LIMIT};
use crate::config::ProviderConfig;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP client build error: {0}")]
    ClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("unexpected HTTP status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("provider rejected request for {symbol}: {message}")]
    Api { symbol: String, message: String },
    #[error("undecodable provider payload for {symbol}: {message}")]
    Decode { symbol: String, message: String },
    #[error("provider returned no candles for {symbol}")]
    Empty { symbol: String },
}

pub trait MarketDataClient: Send + Sync {
    // Up to `limit + 1` rows ending at `to_timestamp`, or at the current minute.
    fn fetch_minute_candles(
        &self,
        symbol: &str,
        limit: usize,
        to_timestamp: Option<i64>,
    ) -> Result<Vec<Candle>, ProviderError>;
}

pub(crate) type QueryParams = Vec<(&'static str, String)>;

pub(crate) trait HttpFetcher: Send + Sync {
    fn get_bytes(
        &self,
        url: &str,
        query: &[(&'static str, String)],
    ) -> Result<Vec<u8>, ProviderError>;
}

struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    fn new(timeout_ms: u64) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| ProviderError::ClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(
        &self,
        url: &str,
        query: &[(&'static str, String)],
    ) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|err| ProviderError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| ProviderError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

pub struct CryptoCompareClient {
    cfg: ProviderConfig,
    fetcher: Box<dyn HttpFetcher>,
    calls_made: AtomicU64,
}

impl CryptoCompareClient {
    pub fn new(cfg: ProviderConfig) -> Result<Self, ProviderError> {
        let fetcher = ReqwestBlockingFetcher::new(cfg.timeout_ms)?;
        Ok(Self::with_fetcher(cfg, Box::new(fetcher)))
    }

    pub(crate) fn with_fetcher(cfg: ProviderConfig, fetcher: Box<dyn HttpFetcher>) -> Self {
        Self {
            cfg,
            fetcher,
            calls_made: AtomicU64::new(0),
        }
    }

    pub fn calls_made(&self) -> u64 {
        self.calls_made.load(Ordering::Relaxed)
    }

    pub fn histominute_url(&self) -> String {
        format!("{}/data/histominute", self.cfg.base_url)
    }

    pub(crate) fn histominute_query(
        &self,
        symbol: &str,
        limit: usize,
        to_timestamp: Option<i64>,
    ) -> QueryParams {
        let mut query = vec![
            ("fsym", symbol.to_string()),
            ("tsym", self.cfg.tsym.clone()),
            ("limit", limit.min(PAGE_LIMIT).to_string()),
        ];
        if let Some(to_ts) = to_timestamp {
            query.push(("toTs", to_ts.to_string()));
        }
        query.push(("e", self.cfg.exchange.clone()));
        query
    }
}

impl MarketDataClient for CryptoCompareClient {
    fn fetch_minute_candles(
        &self,
        symbol: &str,
        limit: usize,
        to_timestamp: Option<i64>,
    ) -> Result<Vec<Candle>, ProviderError> {
        let url = self.histominute_url();
        let query = self.histominute_query(symbol, limit, to_timestamp);
        let call_number = self.calls_made.fetch_add(1, Ordering::Relaxed) + 1;

        info!(
            component = "market_data",
            event = "provider.call",
            symbol,
            limit = limit.min(PAGE_LIMIT),
            to_timestamp = ?to_timestamp,
            call_number
        );
        debug!(
            component = "market_data",
            event = "provider.call.debug",
            url = %url,
            query = ?query
        );

        let payload = self.fetcher.get_bytes(&url, &query).inspect_err(|err| {
            warn!(
                component = "market_data",
                event = "provider.call.failed",
                symbol,
                error = %err
            );
        })?;

        parse_histominute_payload(symbol, &payload)
    }
}

#[derive(Debug, Deserialize)]
struct HistoMinuteResponse {
    #[serde(rename = "Response")]
    response: String,
    #[serde(rename = "Message", default)]
    message: String,
    #[serde(rename = "Data", default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireCandle {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(rename = "volumefrom")]
    volume_from: f64,
    #[serde(rename = "volumeto")]
    volume_to: f64,
}

fn parse_histominute_payload(symbol: &str, payload: &[u8]) -> Result<Vec<Candle>, ProviderError> {
    let decoded: HistoMinuteResponse =
        serde_json::from_slice(payload).map_err(|err| ProviderError::Decode {
            symbol: symbol.to_string(),
            message: err.to_string(),
        })?;

    if decoded.response != "Success" {
        return Err(ProviderError::Api {
            symbol: symbol.to_string(),
            message: if decoded.message.is_empty() {
                decoded.response
            } else {
                decoded.message
            },
        });
    }

    let wire: Vec<WireCandle> = match decoded.data {
        Some(value) => serde_json::from_value(value).map_err(|err| ProviderError::Decode {
            symbol: symbol.to_string(),
            message: err.to_string(),
        })?,
        None => Vec::new(),
    };

    if wire.is_empty() {
        return Err(ProviderError::Empty {
            symbol: symbol.to_string(),
        });
    }

    let mut candles: Vec<Candle> = wire
        .into_iter()
        .map(|c| Candle {
            time: c.time,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume_from: c.volume_from,
            volume_to: c.volume_to,
        })
        .collect();
    candles.sort_by_key(|candle| candle.time);

    Ok(candles)
}
