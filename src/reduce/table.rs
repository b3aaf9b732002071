// Shared reduce-table configuration and the hash-partition helpers both
// table flavors route through. Grounded on
// `thrill/core/reduce_table.hpp`'s `DefaultReduceConfig` and
// `ReduceByHash`/`ReduceByIndex` index functions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Tuning knobs shared by the probing and bucket table flavors.
#[derive(Debug, Clone, Copy)]
pub struct ReduceConfig {
    /// Fraction of a partition's capacity that triggers a flush-to-stream
    /// (pre-phase) or a flush-to-scratch-File (post-phase spill).
    pub limit_partition_fill_rate: f64,
    /// Only meaningful for the bucket table: ratio of buckets actually used
    /// relative to the maximum a partition may grow to before it is
    /// considered full.
    pub bucket_rate: f64,
    /// Initial per-partition capacity (slots for the probing table, buckets
    /// for the bucket table).
    pub initial_items_per_partition: usize,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        ReduceConfig {
            limit_partition_fill_rate: 0.5,
            bucket_rate: 0.6,
            initial_items_per_partition: 512,
        }
    }
}

/// Hashes `key`, mixed with `salt`, into a `u64`. `salt` changes on every
/// iterative-reduction round so that keys colliding in round `k` disperse
/// in round `k+1`, per spec §4.7's "a new post-phase sub-table whose index
/// function uses iteration number `k` as hash salt".
pub fn hash_with_salt<K: Hash>(key: &K, salt: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    salt.hash(&mut hasher);
    key.hash(&mut hasher);
    hasher.finish()
}

/// `hash(key) mod num_partitions`, the pre-phase's destination-worker /
/// post-phase's partition-index function.
pub fn partition_of<K: Hash>(key: &K, salt: u64, num_partitions: usize) -> usize {
    (hash_with_salt(key, salt) % num_partitions as u64) as usize
}

/// `ReduceToIndex`'s index function: `k * W / N` (spec §4.7), replacing the
/// hash entirely since the key already is the destination index.
pub fn scaled_index(key: usize, num_partitions: usize, num_indices: usize) -> usize {
    if num_indices == 0 {
        return 0;
    }
    ((key as u128 * num_partitions as u128) / num_indices as u128) as usize
}
