//! Decides which fetched candles are new relative to what is already stored.

use tracing::warn;

use crate::candle::{Candle, InvalidCandle, StoredCandle, PAGE_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    GapFill { from_time: i64, to_time: i64 },
    CatchUp { last_known_time: Option<i64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUpAnchor {
    NotApplicable,
    NoHistory,
    Found { index: usize },
    // Whole window considered, filtered by `time > last_known_time`.
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub rows: Vec<StoredCandle>,
    pub rejected: Vec<InvalidCandle>,
    pub insertion_point: usize,
    pub anchor: CatchUpAnchor,
}

impl InsertBatch {
    fn empty(anchor: CatchUpAnchor) -> Self {
        Self {
            rows: Vec::new(),
            rejected: Vec::new(),
            insertion_point: 0,
            anchor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.anchor, CatchUpAnchor::NotFound)
    }
}

// `fetched` must be strictly ascending by time.
pub fn reconcile(coin_id: i64, fetched: &[Candle], boundary: Boundary) -> InsertBatch {
    match boundary {
        Boundary::GapFill { from_time, to_time } => {
            reconcile_gap_fill(coin_id, fetched, from_time, to_time)
        }
        Boundary::CatchUp { last_known_time } => {
            reconcile_catch_up(coin_id, fetched, last_known_time)
        }
    }
}

fn reconcile_gap_fill(coin_id: i64, fetched: &[Candle], from_time: i64, to_time: i64) -> InsertBatch {
    // Two rows can only be the endpoints themselves.
    if fetched.len() < 3 {
        return InsertBatch::empty(CatchUpAnchor::NotApplicable);
    }

    let mut interior = fetched;
    if interior.first().map(|c| c.time) == Some(from_time) {
        interior = &interior[1..];
    }
    if interior.last().map(|c| c.time) == Some(to_time) {
        interior = &interior[..interior.len() - 1];
    }

    let candidates: Vec<Candle> = interior
        .iter()
        .filter(|c| c.time > from_time && c.time < to_time)
        .copied()
        .collect();
    let (rows, rejected) = build_insert_batch(coin_id, &candidates);

    InsertBatch {
        rows,
        rejected,
        insertion_point: 0,
        anchor: CatchUpAnchor::NotApplicable,
    }
}

fn reconcile_catch_up(coin_id: i64, fetched: &[Candle], last_known_time: Option<i64>) -> InsertBatch {
    let anchor = match last_known_time {
        None => CatchUpAnchor::NoHistory,
        Some(last) => fetched
            .iter()
            .take(PAGE_LIMIT + 1)
            .position(|c| c.time == last)
            .map(|index| CatchUpAnchor::Found { index })
            .unwrap_or(CatchUpAnchor::NotFound),
    };

    let insertion_point = match anchor {
        CatchUpAnchor::Found { index } => index + 1,
        _ => 0,
    };

    // The newest bucket is still open.
    let end = fetched.len().saturating_sub(1);
    if insertion_point >= end {
        return InsertBatch {
            insertion_point,
            ..InsertBatch::empty(anchor)
        };
    }

    let candidates: Vec<Candle> = fetched[insertion_point..end]
        .iter()
        .filter(|c| last_known_time.map_or(true, |last| c.time > last))
        .copied()
        .collect();
    let (rows, rejected) = build_insert_batch(coin_id, &candidates);

    InsertBatch {
        rows,
        rejected,
        insertion_point,
        anchor,
    }
}

pub fn build_insert_batch(
    coin_id: i64,
    candles: &[Candle],
) -> (Vec<StoredCandle>, Vec<InvalidCandle>) {
    let mut rows = Vec::with_capacity(candles.len());
    let mut rejected = Vec::new();

    for candle in candles {
        match StoredCandle::from_candle(coin_id, candle) {
            Ok(row) => rows.push(row),
            Err(err) => {
                warn!(
                    component = "reconcile",
                    event = "reconcile.invalid_candle",
                    coin_id,
                    time = err.time(),
                    error = %err
                );
                rejected.push(err);
            }
        }
    }

    (rows, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::{candle_at, STEP_SECONDS};

    fn series(times: &[i64]) -> Vec<Candle> {
        times.iter().copied().map(candle_at).collect()
    }

    fn times(batch: &InsertBatch) -> Vec<i64> {
        batch.rows.iter().map(|r| r.time).collect()
    }

    #[test]
    fn gap_fill_drops_both_stored_endpoints() {
        let batch = reconcile(
            1,
            &series(&[160, 220, 280, 340]),
            Boundary::GapFill {
                from_time: 160,
                to_time: 340,
            },
        );
        assert_eq!(times(&batch), vec![220, 280]);
        assert!(batch.rows.iter().all(|r| r.coin_id == 1));
        assert_eq!(batch.anchor, CatchUpAnchor::NotApplicable);
    }

    #[test]
    fn gap_fill_with_fewer_than_three_rows_is_empty() {
        let boundary = Boundary::GapFill {
            from_time: 160,
            to_time: 220,
        };
        assert!(reconcile(1, &series(&[160, 220]), boundary).is_empty());
        assert!(reconcile(1, &series(&[190]), boundary).is_empty());
        assert!(reconcile(1, &[], boundary).is_empty());
    }

    #[test]
    fn gap_fill_keeps_only_strict_interior_when_provider_overshoots() {
        let batch = reconcile(
            1,
            &series(&[100, 160, 220, 280, 340, 400]),
            Boundary::GapFill {
                from_time: 160,
                to_time: 340,
            },
        );
        assert_eq!(times(&batch), vec![220, 280]);
    }

    #[test]
    fn gap_fill_when_endpoints_are_missing_from_fetch() {
        let batch = reconcile(
            1,
            &series(&[220, 280, 300]),
            Boundary::GapFill {
                from_time: 160,
                to_time: 340,
            },
        );
        assert_eq!(times(&batch), vec![220, 280, 300]);
    }

    #[test]
    fn catch_up_without_history_takes_all_but_the_open_bucket() {
        let fetched = series(&[0, 60, 120, 180, 240]);
        let batch = reconcile(
            2,
            &fetched,
            Boundary::CatchUp {
                last_known_time: None,
            },
        );
        assert_eq!(batch.insertion_point, 0);
        assert_eq!(batch.anchor, CatchUpAnchor::NoHistory);
        assert_eq!(times(&batch), vec![0, 60, 120, 180]);
    }

    #[test]
    fn catch_up_starts_after_the_last_known_candle() {
        let fetched = series(&[0, 60, 120, 180, 240, 300]);
        let batch = reconcile(
            2,
            &fetched,
            Boundary::CatchUp {
                last_known_time: Some(120),
            },
        );
        assert_eq!(batch.anchor, CatchUpAnchor::Found { index: 2 });
        assert_eq!(batch.insertion_point, 3);
        assert_eq!(times(&batch), vec![180, 240]);
        assert!(!batch.is_degraded());
    }

    #[test]
    fn catch_up_at_the_open_bucket_has_nothing_to_insert() {
        let fetched = series(&[0, 60, 120]);
        let at_second_last = reconcile(
            2,
            &fetched,
            Boundary::CatchUp {
                last_known_time: Some(60),
            },
        );
        assert!(at_second_last.is_empty());

        let at_last = reconcile(
            2,
            &fetched,
            Boundary::CatchUp {
                last_known_time: Some(120),
            },
        );
        assert!(at_last.is_empty());
        assert_eq!(at_last.insertion_point, 3);
    }

    #[test]
    fn catch_up_without_anchor_is_degraded_but_never_reinserts_old_times() {
        let base = 1_700_000_000;
        let fetched: Vec<Candle> = (0..10).map(|i| candle_at(base + i * STEP_SECONDS)).collect();

        // Store ahead of the window start but not aligned to the minute grid.
        let last_known = base + 4 * STEP_SECONDS + 30;
        let batch = reconcile(
            3,
            &fetched,
            Boundary::CatchUp {
                last_known_time: Some(last_known),
            },
        );

        assert!(batch.is_degraded());
        assert_eq!(batch.insertion_point, 0);
        assert!(batch.rows.iter().all(|r| r.time > last_known));
        assert_eq!(
            times(&batch),
            (5..9).map(|i| base + i * STEP_SECONDS).collect::<Vec<_>>()
        );
    }

    #[test]
    fn catch_up_with_history_older_than_the_window_takes_the_whole_window() {
        let fetched = series(&[10_000, 10_060, 10_120, 10_180, 10_240, 10_300]);
        let batch = reconcile(
            1,
            &fetched,
            Boundary::CatchUp {
                last_known_time: Some(100),
            },
        );

        assert_eq!(batch.anchor, CatchUpAnchor::NotFound);
        assert!(batch.is_degraded());
        assert_eq!(batch.insertion_point, 0);
        assert_eq!(times(&batch), vec![10_000, 10_060, 10_120, 10_180, 10_240]);
        assert!(batch.rejected.is_empty());
    }

    #[test]
    fn catch_up_behind_a_store_that_is_newer_than_the_window_inserts_nothing() {
        let batch = reconcile(
            3,
            &series(&[0, 60, 120, 180]),
            Boundary::CatchUp {
                last_known_time: Some(10_000),
            },
        );
        assert!(batch.is_degraded());
        assert!(batch.is_empty());
    }

    #[test]
    fn zero_open_rows_are_rejected_not_inserted() {
        let mut fetched = series(&[160, 220, 280, 340, 400]);
        fetched[2].open = 0.0;

        let batch = reconcile(
            5,
            &fetched,
            Boundary::GapFill {
                from_time: 160,
                to_time: 400,
            },
        );

        assert_eq!(times(&batch), vec![220, 340]);
        assert_eq!(
            batch.rejected,
            vec![InvalidCandle::ZeroOpen {
                coin_id: 5,
                time: 280
            }]
        );
        assert!(batch.rows.iter().all(|r| r.percent_change.is_finite()));
    }
}
