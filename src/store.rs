//! Candle storage collaborators: the registry of tracked coins and the
//! minute candle table.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::info;

use crate::candle::{Coin, StoredCandle};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("batch for coin {expected} contains a row for coin {found}")]
    ForeignRow { expected: i64, found: i64 },
}

pub trait CoinRegistry: Send + Sync {
    fn list_tracked_coins(&self) -> Result<Vec<Coin>, StoreError>;
}

pub trait CandleStore: Send + Sync {
    fn list_timestamps(&self, coin_id: i64) -> Result<Vec<i64>, StoreError>;

    fn last_timestamp(&self, coin_id: i64) -> Result<Option<i64>, StoreError>;

    fn insert_batch(&self, coin_id: i64, rows: &[StoredCandle]) -> Result<usize, StoreError>;
}

pub struct SqliteCandleStore {
    conn: Mutex<Connection>,
}

impl SqliteCandleStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        ensure_schema(&conn)?;

        info!(
            component = "store",
            event = "store.open",
            path = %path.display()
        );

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn register_coin(&self, symbol: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tracked_coins (symbol) VALUES (?1) ON CONFLICT(symbol) DO NOTHING",
            params![symbol],
        )?;
        let id = conn.query_row(
            "SELECT id FROM tracked_coins WHERE symbol = ?1",
            params![symbol],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn count_range(
        &self,
        coin_id: i64,
        start: i64,
        end_exclusive: i64,
    ) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "
            SELECT COUNT(*)
            FROM histo_minute
            WHERE coin_id = ?1
              AND time >= ?2
              AND time < ?3
            ",
            params![coin_id, start, end_exclusive],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn load_rows(&self, coin_id: i64) -> Result<Vec<StoredCandle>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "
            SELECT coin_id, time, open, high, low, close, volume_from, volume_to, percent_change
            FROM histo_minute
            WHERE coin_id = ?1
            ORDER BY time ASC
            ",
        )?;
        let rows = stmt
            .query_map(params![coin_id], |row| {
                Ok(StoredCandle {
                    coin_id: row.get(0)?,
                    time: row.get(1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume_from: row.get(6)?,
                    volume_to: row.get(7)?,
                    percent_change: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl CoinRegistry for SqliteCandleStore {
    fn list_tracked_coins(&self) -> Result<Vec<Coin>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, symbol FROM tracked_coins ORDER BY id ASC")?;
        let coins = stmt
            .query_map([], |row| {
                Ok(Coin {
                    id: row.get(0)?,
                    symbol: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(coins)
    }
}

impl CandleStore for SqliteCandleStore {
    fn list_timestamps(&self, coin_id: i64) -> Result<Vec<i64>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT time FROM histo_minute WHERE coin_id = ?1 ORDER BY time ASC")?;
        let times = stmt
            .query_map(params![coin_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(times)
    }

    fn last_timestamp(&self, coin_id: i64) -> Result<Option<i64>, StoreError> {
        let conn = self.lock()?;
        let last = conn
            .query_row(
                "SELECT MAX(time) FROM histo_minute WHERE coin_id = ?1",
                params![coin_id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        Ok(last)
    }

    fn insert_batch(&self, coin_id: i64, rows: &[StoredCandle]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        ensure_single_coin(coin_id, rows)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO histo_minute (
                    coin_id,
                    time,
                    open,
                    high,
                    low,
                    close,
                    volume_from,
                    volume_to,
                    percent_change
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(coin_id, time) DO NOTHING
                ",
            )?;

            for row in rows {
                inserted += stmt.execute(params![
                    row.coin_id,
                    row.time,
                    row.open,
                    row.high,
                    row.low,
                    row.close,
                    row.volume_from,
                    row.volume_to,
                    row.percent_change,
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tracked_coins (
            id INTEGER PRIMARY KEY,
            symbol TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS histo_minute (
            coin_id INTEGER NOT NULL,
            time INTEGER NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume_from REAL NOT NULL,
            volume_to REAL NOT NULL,
            percent_change REAL NOT NULL,
            PRIMARY KEY(coin_id, time)
        ) WITHOUT ROWID;
        ",
    )?;
    Ok(())
}

fn ensure_single_coin(coin_id: i64, rows: &[StoredCandle]) -> Result<(), StoreError> {
    match rows.iter().find(|row| row.coin_id != coin_id) {
        Some(row) => Err(StoreError::ForeignRow {
            expected: coin_id,
            found: row.coin_id,
        }),
        None => Ok(()),
    }
}

// Duplicate times are ignored on insert, as in SQLite.
#[derive(Default)]
pub struct InMemoryCandleStore {
    coins: RwLock<Vec<Coin>>,
    rows: RwLock<BTreeMap<(i64, i64), StoredCandle>>,
    insert_calls: Mutex<Vec<(i64, usize)>>,
}

impl InMemoryCandleStore {
    pub fn new(coins: Vec<Coin>) -> Self {
        Self {
            coins: RwLock::new(coins),
            ..Self::default()
        }
    }

    pub fn with_timestamps(self, coin_id: i64, times: &[i64]) -> Self {
        {
            let mut rows = self
                .rows
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for &time in times {
                rows.insert(
                    (coin_id, time),
                    StoredCandle {
                        coin_id,
                        time,
                        open: 1.0,
                        high: 1.0,
                        low: 1.0,
                        close: 1.0,
                        volume_from: 0.0,
                        volume_to: 0.0,
                        percent_change: 0.0,
                    },
                );
            }
        }
        self
    }

    pub fn rows_for(&self, coin_id: i64) -> Vec<StoredCandle> {
        self.rows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .range((coin_id, i64::MIN)..=(coin_id, i64::MAX))
            .map(|(_, row)| *row)
            .collect()
    }

    pub fn insert_calls(&self) -> Vec<(i64, usize)> {
        self.insert_calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CoinRegistry for InMemoryCandleStore {
    fn list_tracked_coins(&self) -> Result<Vec<Coin>, StoreError> {
        self.coins
            .read()
            .map(|coins| coins.clone())
            .map_err(|_| StoreError::LockPoisoned)
    }
}

impl CandleStore for InMemoryCandleStore {
    fn list_timestamps(&self, coin_id: i64) -> Result<Vec<i64>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows
            .range((coin_id, i64::MIN)..=(coin_id, i64::MAX))
            .map(|((_, time), _)| *time)
            .collect())
    }

    fn last_timestamp(&self, coin_id: i64) -> Result<Option<i64>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows
            .range((coin_id, i64::MIN)..=(coin_id, i64::MAX))
            .next_back()
            .map(|((_, time), _)| *time))
    }

    fn insert_batch(&self, coin_id: i64, rows: &[StoredCandle]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        ensure_single_coin(coin_id, rows)?;

        let mut stored = self.rows.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut inserted = 0usize;
        for row in rows {
            if let std::collections::btree_map::Entry::Vacant(slot) =
                stored.entry((coin_id, row.time))
            {
                slot.insert(*row);
                inserted += 1;
            }
        }

        self.insert_calls
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .push((coin_id, rows.len()));
        Ok(inserted)
    }
}
