// ReduceToIndex (C8): the key is a dense index in [0, N); hash(key) is
// replaced by k*W/N (worker routing) and k*B/N (bucket routing), and every
// index in this worker's local range that never received an item gets a
// caller-supplied neutral element so the output is dense. Grounded on
// `c7a/api/reduce_to_index_node.hpp`.

use crate::block::serialization::Serialization;
use crate::reduce::probing::ProbingTable;
use crate::reduce::table::scaled_index;
use crate::Result;

pub struct ReduceToIndexPhase<V> {
    table: ProbingTable<usize, V>,
    num_indices: usize,
    local_lo: usize,
    local_hi: usize,
    reduce_fn: Box<dyn Fn(V, V) -> V + Send + Sync>,
}

impl<V: Clone + Serialization> ReduceToIndexPhase<V> {
    /// `local_lo..local_hi` is this worker's slice of `[0, num_indices)`,
    /// i.e. indices `i` with `scaled_index(i, num_workers, num_indices) ==
    /// my_rank`.
    pub fn new(num_indices: usize, local_lo: usize, local_hi: usize, reduce_fn: impl Fn(V, V) -> V + Send + Sync + 'static) -> Self {
        let capacity = (local_hi - local_lo).max(4);
        ReduceToIndexPhase {
            table: ProbingTable::new(capacity, 0, 0.8),
            num_indices,
            local_lo,
            local_hi,
            reduce_fn: Box::new(reduce_fn),
        }
    }

    pub fn num_indices(&self) -> usize {
        self.num_indices
    }

    pub fn insert(&mut self, index: usize, value: V) {
        debug_assert!(index >= self.local_lo && index < self.local_hi);
        self.table.insert_or_reduce(index, value, &*self.reduce_fn);
    }

    /// Returns every index in `[local_lo, local_hi)` paired with its
    /// reduced value, or `neutral_element` for indices nothing was ever
    /// inserted for, in ascending index order.
    pub fn finish(mut self, neutral_element: V) -> Result<Vec<(usize, V)>> {
        let entries = self.table.drain();
        let mut by_index = vec![None; self.local_hi - self.local_lo];
        for (index, value) in entries {
            by_index[index - self.local_lo] = Some(value);
        }
        Ok(by_index
            .into_iter()
            .enumerate()
            .map(|(offset, value)| (self.local_lo + offset, value.unwrap_or_else(|| neutral_element.clone())))
            .collect())
    }
}

/// Worker routing function for ReduceToIndex: `k * W / N`.
pub fn worker_for_index(index: usize, num_workers: usize, num_indices: usize) -> usize {
    scaled_index(index, num_workers, num_indices)
}

/// Bucket routing function for ReduceToIndex: `k * B / N`.
pub fn bucket_for_index(index: usize, num_buckets: usize, num_indices: usize) -> usize {
    scaled_index(index, num_buckets, num_indices)
}
