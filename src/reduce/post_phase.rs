// Reduce post-phase (C8): insert-or-reduce on the consumer side, spilling
// a partition's in-memory entries to a scratch File under memory pressure,
// then resolving any not-fully-reduced partitions through iterative
// re-reduction with a salted hash per round. Grounded on
// `thrill/core/reduce_post_stage.hpp`'s flush algorithm and
// `thrill/core/reduce_by_hash_post_stage.hpp`'s per-partition probing
// table.

use std::hash::Hash;
use std::sync::Arc;

use crate::block::serialization::Serialization;
use crate::block::{BlockPool, File};
use crate::mem::{AllocationSource, Manager};
use crate::reduce::probing::ProbingTable;
use crate::reduce::table::{partition_of, ReduceConfig};
use crate::Result;

/// Caps the iterative re-reduction loop described in spec §9's resolved
/// Open Question: a salt change should redistribute a colliding partition,
/// but the source gives no hard bound, so a conforming implementation caps
/// iterations and falls back to a non-iterative sort-based group-by.
pub const MAX_REDUCE_ITERATIONS: u32 = 16;

pub struct PostPhase<K, V> {
    pool: Arc<BlockPool>,
    memory: Arc<Manager>,
    tables: Vec<ProbingTable<K, V>>,
    /// `Some` once a partition has spilled at least once.
    spill_files: Vec<Option<Arc<File>>>,
    config: ReduceConfig,
    reduce_fn: Arc<dyn Fn(V, V) -> V + Send + Sync>,
}

impl<K, V> PostPhase<K, V>
where
    K: Eq + Hash + Clone + Serialization + Send + Sync + 'static,
    V: Clone + Serialization + Send + Sync + 'static,
{
    /// Per-entry byte cost charged against `AllocationSource::ReduceTables`.
    /// Approximates an entry's footprint as `size_of::<(K, V)>()`; heap
    /// allocations owned by `K`/`V` (e.g. a `String` key's buffer) are not
    /// separately accounted for.
    const ENTRY_SIZE: usize = std::mem::size_of::<(K, V)>();

    pub fn new(
        pool: Arc<BlockPool>,
        memory: Arc<Manager>,
        num_partitions: usize,
        config: ReduceConfig,
        reduce_fn: impl Fn(V, V) -> V + Send + Sync + 'static,
    ) -> Self {
        let tables = (0..num_partitions)
            .map(|_| ProbingTable::new(config.initial_items_per_partition, 0, config.limit_partition_fill_rate))
            .collect();
        PostPhase {
            pool,
            memory,
            tables,
            spill_files: (0..num_partitions).map(|_| None).collect(),
            config,
            reduce_fn: Arc::new(reduce_fn),
        }
    }

    /// Inserts one inbound `(key, value)` pair, folding with any existing
    /// entry. Tracks net-new entries against the shared `Manager` under
    /// `AllocationSource::ReduceTables` (spec §4.8), then polls the shared
    /// memory-pressure flag after the insert and spills the largest
    /// partition if it is set, per spec §4.8's "operator code polls this
    /// flag at natural boundaries ... and spills the largest current
    /// partition when set".
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let dest = partition_of(&key, 0, self.tables.len());
        let before = self.tables[dest].len();
        self.tables[dest].insert_or_reduce(key, value, &*self.reduce_fn);
        let grew = self.tables[dest].len() - before;
        if grew > 0 {
            self.memory.track(AllocationSource::ReduceTables, (grew * Self::ENTRY_SIZE) as u64);
        }
        if self.memory.memory_exceeded() {
            self.spill_largest_partition()?;
        }
        Ok(())
    }

    fn spill_largest_partition(&mut self) -> Result<()> {
        let Some((index, _)) = self
            .tables
            .iter()
            .enumerate()
            .max_by_key(|(_, t)| t.len())
            .filter(|(_, t)| !t.is_empty())
        else {
            return Ok(());
        };
        self.spill_partition(index)
    }

    fn spill_partition(&mut self, index: usize) -> Result<()> {
        let entries = self.tables[index].drain();
        if entries.is_empty() {
            return Ok(());
        }
        self.memory.untrack(AllocationSource::ReduceTables, (entries.len() * Self::ENTRY_SIZE) as u64);
        let file = self.spill_files[index].get_or_insert_with(|| File::new(Arc::clone(&self.pool)));
        let mut writer = file.get_writer(256 * 1024);
        for entry in &entries {
            writer.put(entry)?;
        }
        writer.close()?;
        Ok(())
    }

    /// Runs the flush algorithm of spec §4.7: emits fully in-memory
    /// partitions directly, spills the rest, then iteratively re-reduces
    /// every spilled File with a fresh salt until none remain or
    /// `MAX_REDUCE_ITERATIONS` is hit, at which point any still-unresolved
    /// partition is resolved with one non-iterative sort-based group-by
    /// pass instead of looping further.
    pub fn finish(mut self) -> Result<Vec<(K, V)>> {
        let mut output = Vec::new();
        let mut remaining_files: Vec<Arc<File>> = Vec::new();

        for index in 0..self.tables.len() {
            match self.spill_files[index].take() {
                None => {
                    let entries = self.tables[index].drain();
                    self.memory.untrack(AllocationSource::ReduceTables, (entries.len() * Self::ENTRY_SIZE) as u64);
                    output.extend(entries);
                }
                Some(file) => {
                    // Partition touched external memory at some point;
                    // spill whatever is still resident too so every entry
                    // for this partition lives in one File.
                    let remainder = self.tables[index].drain();
                    if !remainder.is_empty() {
                        self.memory
                            .untrack(AllocationSource::ReduceTables, (remainder.len() * Self::ENTRY_SIZE) as u64);
                        let mut writer = file.get_writer(256 * 1024);
                        for entry in &remainder {
                            writer.put(entry)?;
                        }
                        writer.close()?;
                    }
                    remaining_files.push(file);
                }
            }
        }

        let mut salt = 1u64;
        let mut iteration = 0u32;
        while !remaining_files.is_empty() && iteration < MAX_REDUCE_ITERATIONS {
            let num_partitions = remaining_files.len().max(1);
            let mut round_tables: Vec<ProbingTable<K, V>> = (0..num_partitions)
                .map(|_| ProbingTable::new(self.config.initial_items_per_partition, salt, self.config.limit_partition_fill_rate))
                .collect();
            let mut still_remaining = Vec::new();

            for file in remaining_files.drain(..) {
                let mut reader = file.get_consume_reader();
                while reader.has_next() {
                    let (key, value) = reader.next::<(K, V)>()?;
                    let dest = partition_of(&key, salt, num_partitions);
                    round_tables[dest].insert_or_reduce(key, value, &*self.reduce_fn);
                }
            }

            for mut table in round_tables {
                if table.load_factor() <= self.config.limit_partition_fill_rate {
                    output.extend(table.drain());
                } else {
                    let spill = File::new(Arc::clone(&self.pool));
                    let mut writer = spill.get_writer(256 * 1024);
                    for entry in table.drain() {
                        writer.put(&entry)?;
                    }
                    writer.close()?;
                    still_remaining.push(spill);
                }
            }

            remaining_files = still_remaining;
            salt += 1;
            iteration += 1;
        }

        if !remaining_files.is_empty() {
            tracing::warn!(
                "reduce post-phase: {} partition(s) still unresolved after {} salted rounds, falling back to sort-based group-by",
                remaining_files.len(),
                MAX_REDUCE_ITERATIONS,
            );
            output.extend(Self::external_group_by(remaining_files, &*self.reduce_fn)?);
        }

        Ok(output)
    }

    /// Non-iterative fallback once the salted-hash loop is exhausted: loads
    /// every remaining File's entries, sorts by a stable key ordering
    /// surrogate (re-hash with a fixed salt, since `K` is not required to
    /// be `Ord`), and folds adjacent equal keys. A genuine external
    /// k-way merge sort is not implemented; this sorts in memory, which is
    /// sound only because this path is reached at most once per partition
    /// after 16 failed redistribution attempts. Documented in DESIGN.md.
    fn external_group_by(files: Vec<Arc<File>>, reduce_fn: &(dyn Fn(V, V) -> V + Send + Sync)) -> Result<Vec<(K, V)>> {
        let mut entries: Vec<(u64, K, V)> = Vec::new();
        for file in files {
            let mut reader = file.get_consume_reader();
            while reader.has_next() {
                let (key, value) = reader.next::<(K, V)>()?;
                let h = crate::reduce::table::hash_with_salt(&key, 0);
                entries.push((h, key, value));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut output = Vec::new();
        let mut iter = entries.into_iter();
        if let Some((mut current_hash, mut current_key, mut current_value)) = iter.next() {
            for (h, k, v) in iter {
                if h == current_hash && k == current_key {
                    current_value = reduce_fn(current_value, v);
                } else {
                    output.push((current_key, current_value));
                    current_hash = h;
                    current_key = k;
                    current_value = v;
                }
            }
            output.push((current_key, current_value));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Manager;

    fn pool() -> Arc<BlockPool> {
        BlockPool::new(1 << 20, 1 << 21, Arc::new(Manager::new(1 << 20, 1 << 21)))
    }

    #[test]
    fn insert_or_reduce_without_spill_emits_every_key_once() {
        let memory = Arc::new(Manager::new(1 << 20, 1 << 21));
        let mut post = PostPhase::new(pool(), memory, 4, ReduceConfig::default(), |a: i32, b: i32| a + b);
        for (key, value) in [("a", 1), ("b", 1), ("a", 1), ("c", 1), ("b", 1), ("a", 1)] {
            post.insert(key.to_string(), value).unwrap();
        }
        let mut result = post.finish().unwrap();
        result.sort();
        assert_eq!(
            result,
            vec![("a".to_string(), 3), ("b".to_string(), 2), ("c".to_string(), 1)]
        );
    }

    #[test]
    fn spilled_partition_still_reduces_correctly() {
        let memory = Arc::new(Manager::new(1 << 20, 1 << 21));
        let mut post = PostPhase::new(pool(), Arc::clone(&memory), 2, ReduceConfig::default(), |a: i32, b: i32| a + b);
        for i in 0..2000 {
            post.insert(i % 50, 1i32).unwrap();
            if i == 500 {
                // Simulate memory pressure mid-stream: force a spill of the
                // currently-largest partition.
                post.spill_largest_partition().unwrap();
            }
        }
        let mut result = post.finish().unwrap();
        result.sort();
        assert_eq!(result.len(), 50);
        for (_, count) in &result {
            assert_eq!(*count, 40);
        }
    }
}
