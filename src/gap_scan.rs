//! Finds holes in a coin's stored minute history.

use tracing::debug;

use crate::candle::{Gap, STEP_SECONDS};
use crate::store::{CandleStore, StoreError};

pub fn find_gaps(store: &dyn CandleStore, coin_id: i64) -> Result<Vec<Gap>, StoreError> {
    let times = store.list_timestamps(coin_id)?;
    let gaps = gaps_in_timestamps(coin_id, &times);

    debug!(
        component = "gap_scan",
        event = "gap_scan.finish",
        coin_id,
        stored_points = times.len(),
        gaps = gaps.len()
    );

    Ok(gaps)
}

// `times` must be ascending.
pub fn gaps_in_timestamps(coin_id: i64, times: &[i64]) -> Vec<Gap> {
    times
        .windows(2)
        .filter(|pair| pair[1] - pair[0] > STEP_SECONDS)
        .map(|pair| Gap {
            coin_id,
            from_time: pair[0],
            to_time: pair[1],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Coin;
    use crate::store::InMemoryCandleStore;

    #[test]
    fn contiguous_history_has_no_gaps() {
        let times: Vec<i64> = (0..50).map(|i| 1_700_000_000 + i * STEP_SECONDS).collect();
        assert!(gaps_in_timestamps(1, &times).is_empty());
    }

    #[test]
    fn single_hole_yields_exactly_its_bounds() {
        let times = [1_000, 1_060, 1_120, 1_420, 1_480];
        assert_eq!(
            gaps_in_timestamps(9, &times),
            vec![Gap {
                coin_id: 9,
                from_time: 1_120,
                to_time: 1_420
            }]
        );
    }

    #[test]
    fn exact_step_spacing_is_not_a_gap() {
        let gaps = gaps_in_timestamps(1, &[100, 160, 340]);
        assert_eq!(
            gaps,
            vec![Gap {
                coin_id: 1,
                from_time: 160,
                to_time: 340
            }]
        );
    }

    #[test]
    fn multiple_gaps_come_out_in_time_order() {
        let gaps = gaps_in_timestamps(2, &[0, 180, 240, 600, 660]);
        let bounds: Vec<(i64, i64)> = gaps.iter().map(|g| (g.from_time, g.to_time)).collect();
        assert_eq!(bounds, vec![(0, 180), (240, 600)]);
    }

    #[test]
    fn zero_or_one_stored_point_has_no_gaps() {
        assert!(gaps_in_timestamps(1, &[]).is_empty());
        assert!(gaps_in_timestamps(1, &[1_700_000_000]).is_empty());
    }

    #[test]
    fn find_gaps_reads_through_the_store() {
        let store = InMemoryCandleStore::new(vec![Coin::new(4, "SOL")])
            .with_timestamps(4, &[340, 100, 160]);

        let gaps = find_gaps(&store, 4).unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!((gaps[0].from_time, gaps[0].to_time), (160, 340));
        assert!(find_gaps(&store, 5).unwrap().is_empty());
    }
}
