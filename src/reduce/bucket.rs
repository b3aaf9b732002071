// Bucket table (C8): an array of buckets, each a growable list standing in
// for the original's linked chain of fixed-size key/value blocks. Grounded
// on `thrill/core/reduce_bucket_table.hpp`: fixed bucket count per
// partition, each bucket a chain that grows unboundedly rather than
// rehashing on every insert, suited to large values or unknown key
// distributions where a probing table's array growth would be wasteful.
//
// Deviation: the original chains fixed-size `bucket_block_size_`-byte
// blocks so a bucket's memory is reclaimed incrementally. This keeps each
// bucket as a plain growable `Vec<(K, V)>`; the table as a whole still
// reports a load signal so callers can flush/spill, but a single bucket's
// memory is not reclaimed block-by-block. Documented in DESIGN.md.

use std::hash::Hash;
use std::sync::Arc;

use crate::mem::{AllocationSource, Manager};
use crate::reduce::table::hash_with_salt;

pub struct BucketTable<K, V> {
    buckets: Vec<Vec<(K, V)>>,
    salt: u64,
    len: usize,
    /// Soft cap on total entries before the caller should flush/spill this
    /// partition, derived from `bucket_rate` at construction time.
    capacity_hint: usize,
    memory: Arc<Manager>,
}

impl<K: Eq + Hash + Clone, V: Clone> BucketTable<K, V> {
    /// Per-entry byte cost charged against `AllocationSource::ReduceTables`;
    /// approximates an entry as `size_of::<(K, V)>()`, not accounting for
    /// any heap storage `K`/`V` itself owns.
    const ENTRY_SIZE: usize = std::mem::size_of::<(K, V)>();

    pub fn new(num_buckets: usize, salt: u64, capacity_hint: usize, memory: Arc<Manager>) -> Self {
        BucketTable {
            buckets: (0..num_buckets.max(1)).map(|_| Vec::new()).collect(),
            salt,
            len: 0,
            capacity_hint: capacity_hint.max(1),
            memory,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn fill_rate(&self) -> f64 {
        self.len as f64 / self.capacity_hint as f64
    }

    fn bucket_index(&self, key: &K) -> usize {
        (hash_with_salt(key, self.salt) % self.buckets.len() as u64) as usize
    }

    pub fn insert_or_reduce(&mut self, key: K, value: V, reduce_fn: &dyn Fn(V, V) -> V) {
        let idx = self.bucket_index(&key);
        let bucket = &mut self.buckets[idx];
        for (existing_key, existing_value) in bucket.iter_mut() {
            if *existing_key == key {
                let folded = reduce_fn(existing_value.clone(), value.clone());
                *existing_value = folded;
                return;
            }
        }
        bucket.push((key, value));
        self.len += 1;
        self.memory.track(AllocationSource::ReduceTables, Self::ENTRY_SIZE as u64);
    }

    /// Drains every entry across every bucket, bucket order then insertion
    /// order within a bucket.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.len = 0;
        let entries: Vec<(K, V)> = self.buckets.iter_mut().flat_map(|b| b.drain(..)).collect();
        self.memory
            .untrack(AllocationSource::ReduceTables, (entries.len() * Self::ENTRY_SIZE) as u64);
        entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &(K, V)> {
        self.buckets.iter().flatten()
    }
}
