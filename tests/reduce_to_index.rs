// ReduceToIndex across a simulated multi-worker partition (spec.md §8):
// every worker owns a contiguous slice of the dense index space, only some
// indices receive contributions, and the result must still be dense with
// a neutral element filling the holes.

use thrill::reduce::{worker_for_index, ReduceToIndexPhase};

#[test]
fn holes_are_filled_with_the_neutral_element_across_workers() {
    const NUM_WORKERS: usize = 4;
    const NUM_INDICES: usize = 40;

    // Only every third index receives a contribution, doubled so the fold
    // (sum) is observable.
    let contributions: Vec<(usize, i32)> = (0..NUM_INDICES)
        .filter(|i| i % 3 == 0)
        .map(|i| (i, i as i32))
        .collect();

    let mut ranges = Vec::with_capacity(NUM_WORKERS);
    let mut lo = 0;
    for worker in 0..NUM_WORKERS {
        let hi = (0..=NUM_INDICES)
            .find(|&k| worker_for_index(k.min(NUM_INDICES - 1), NUM_WORKERS, NUM_INDICES) > worker || k == NUM_INDICES)
            .unwrap();
        ranges.push((lo, hi));
        lo = hi;
    }
    assert_eq!(lo, NUM_INDICES);

    let mut gathered: Vec<(usize, i32)> = Vec::new();
    for &(worker_lo, worker_hi) in &ranges {
        let mut phase = ReduceToIndexPhase::new(NUM_INDICES, worker_lo, worker_hi, |a: i32, b: i32| a + b);
        for &(index, value) in &contributions {
            if index >= worker_lo && index < worker_hi {
                phase.insert(index, value);
                phase.insert(index, value); // folded, so the final value is 2*value
            }
        }
        gathered.extend(phase.finish(-1).unwrap());
    }

    gathered.sort_by_key(|&(index, _)| index);
    assert_eq!(gathered.len(), NUM_INDICES);
    for (index, value) in gathered {
        if index % 3 == 0 {
            assert_eq!(value, 2 * index as i32);
        } else {
            assert_eq!(value, -1);
        }
    }
}
