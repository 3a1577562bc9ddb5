//! Minute candle value types shared by the scanner, fetcher and reconciler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STEP_SECONDS: i64 = 60;

pub const PAGE_LIMIT: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub id: i64,
    pub symbol: String,
}

impl Coin {
    pub fn new(id: i64, symbol: impl Into<String>) -> Self {
        Self {
            id,
            symbol: symbol.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_from: f64,
    pub volume_to: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredCandle {
    pub coin_id: i64,
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_from: f64,
    pub volume_to: f64,
    pub percent_change: f64,
}

impl StoredCandle {
    pub fn from_candle(coin_id: i64, candle: &Candle) -> Result<Self, InvalidCandle> {
        let percent_change =
            percent_change(candle.open, candle.close).ok_or(InvalidCandle::ZeroOpen {
                coin_id,
                time: candle.time,
            })?;

        Ok(Self {
            coin_id,
            time: candle.time,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume_from: candle.volume_from,
            volume_to: candle.volume_to,
            percent_change,
        })
    }

    pub fn stored_ref(&self) -> StoredCandleRef {
        StoredCandleRef {
            coin_id: self.coin_id,
            time: self.time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredCandleRef {
    pub coin_id: i64,
    pub time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gap {
    pub coin_id: i64,
    pub from_time: i64,
    pub to_time: i64,
}

impl Gap {
    pub fn missing_points(&self) -> u64 {
        if self.to_time <= self.from_time {
            return 0;
        }
        ((self.to_time - self.from_time) / STEP_SECONDS).saturating_sub(1) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InvalidCandle {
    #[error("candle for coin {coin_id} at {time} has a zero open price")]
    ZeroOpen { coin_id: i64, time: i64 },
}

impl InvalidCandle {
    pub fn time(&self) -> i64 {
        match self {
            Self::ZeroOpen { time, .. } => *time,
        }
    }
}

pub fn percent_change(open: f64, close: f64) -> Option<f64> {
    if open == 0.0 {
        return None;
    }
    Some((close - open) / open * 100.0)
}

#[cfg(test)]
pub(crate) fn candle_at(time: i64) -> Candle {
    Candle {
        time,
        open: 100.0,
        high: 101.0,
        low: 99.0,
        close: 100.5,
        volume_from: 1.0,
        volume_to: 100.5,
    }
}
