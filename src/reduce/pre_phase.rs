// Reduce pre-phase (C8): local aggregation on the producer side, emitted to
// the destination worker `hash(key) mod W` once a partition's fill rate
// crosses the configured threshold. Grounded on `thrill/core/reduce_table
// .hpp`'s `ReduceTable` in its pre-phase role (`immediate_flush = false`,
// one partition per destination worker).

use std::hash::Hash;
use std::sync::Arc;

use crate::block::serialization::Serialization;
use crate::block::BlockWriter;
use crate::mem::{AllocationSource, Manager};
use crate::reduce::probing::ProbingTable;
use crate::reduce::table::{partition_of, ReduceConfig};
use crate::stream::StreamSink;
use crate::Result;

pub struct PrePhase<K, V> {
    tables: Vec<ProbingTable<K, V>>,
    writers: Vec<BlockWriter<StreamSink>>,
    memory: Arc<Manager>,
    config: ReduceConfig,
    reduce_fn: Box<dyn Fn(V, V) -> V + Send + Sync>,
}

impl<K: Eq + Hash + Clone + Serialization, V: Clone + Serialization> PrePhase<K, V> {
    /// Per-entry byte cost charged against `AllocationSource::ReduceTables`;
    /// approximates an entry as `size_of::<(K, V)>()`, not accounting for
    /// any heap storage `K`/`V` itself owns.
    const ENTRY_SIZE: usize = std::mem::size_of::<(K, V)>();

    pub fn new(
        writers: Vec<BlockWriter<StreamSink>>,
        memory: Arc<Manager>,
        config: ReduceConfig,
        reduce_fn: impl Fn(V, V) -> V + Send + Sync + 'static,
    ) -> Self {
        let num_partitions = writers.len();
        let tables = (0..num_partitions)
            .map(|_| ProbingTable::new(config.initial_items_per_partition, 0, config.limit_partition_fill_rate))
            .collect();
        PrePhase {
            tables,
            writers,
            memory,
            config,
            reduce_fn: Box::new(reduce_fn),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.writers.len()
    }

    /// Routes `(key, value)` to its destination partition, folding with any
    /// existing entry for the same key, tracking net-new entries against
    /// the shared `Manager`. Flushes that partition if its load factor now
    /// exceeds the configured limit, or flushes the largest partition if
    /// the shared memory-pressure flag is set, per spec §4.8's "operator
    /// code polls this flag at natural boundaries (... end of an inserted
    /// item in the reduce pre-phase) and spills the largest current
    /// partition when set".
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let dest = partition_of(&key, 0, self.tables.len());
        let before = self.tables[dest].len();
        self.tables[dest].insert_or_reduce(key, value, &*self.reduce_fn);
        let grew = self.tables[dest].len() - before;
        if grew > 0 {
            self.memory.track(AllocationSource::ReduceTables, (grew * Self::ENTRY_SIZE) as u64);
        }
        if self.tables[dest].load_factor() > self.config.limit_partition_fill_rate {
            self.flush_partition(dest)?;
        } else if self.memory.memory_exceeded() {
            self.flush_largest_partition()?;
        }
        Ok(())
    }

    fn flush_largest_partition(&mut self) -> Result<()> {
        let Some((index, _)) = self
            .tables
            .iter()
            .enumerate()
            .max_by_key(|(_, t)| t.len())
            .filter(|(_, t)| !t.is_empty())
        else {
            return Ok(());
        };
        self.flush_partition(index)
    }

    fn flush_partition(&mut self, index: usize) -> Result<()> {
        let entries = self.tables[index].drain();
        if !entries.is_empty() {
            self.memory.untrack(AllocationSource::ReduceTables, (entries.len() * Self::ENTRY_SIZE) as u64);
        }
        let writer = &mut self.writers[index];
        for entry in entries {
            writer.put(&entry)?;
        }
        Ok(())
    }

    /// Flushes every partition and closes every writer. Must be called
    /// exactly once, after the last `insert`.
    pub fn finish(mut self) -> Result<()> {
        for i in 0..self.tables.len() {
            self.flush_partition(i)?;
        }
        for writer in &mut self.writers {
            writer.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockPool;
    use crate::mem::Manager;
    use crate::net::Group;
    use crate::stream::Multiplexer;
    use std::sync::Arc;

    fn pool() -> Arc<BlockPool> {
        BlockPool::new(1 << 20, 1 << 21, Arc::new(Manager::new(1 << 20, 1 << 21)))
    }

    #[test]
    fn pre_phase_local_aggregates_and_routes_by_key_hash() {
        let results = Group::execute_local_mock(1, move |group| {
            let mux = Multiplexer::new(group, pool(), 4);
            let stream_id = mux.allocate_stream_id();

            let readers: Vec<_> = (0..4)
                .map(|to| {
                    let mux = Arc::clone(&mux);
                    std::thread::spawn(move || {
                        let mut reader = mux.reader(stream_id, to, 0);
                        let mut out = Vec::new();
                        while reader.has_next() {
                            out.push(reader.next::<(String, i32)>().unwrap());
                        }
                        out
                    })
                })
                .collect();

            let writers: Vec<_> = (0..4).map(|to| mux.writer(stream_id, 0, to)).collect();
            let memory = Arc::new(Manager::new(1 << 20, 1 << 21));
            let mut pre = PrePhase::new(writers, memory, ReduceConfig::default(), |a: i32, b: i32| a + b);
            for word in ["a", "b", "a", "c", "b", "a"] {
                pre.insert(word.to_string(), 1).unwrap();
            }
            pre.finish().unwrap();

            readers.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        let mut all: Vec<(String, i32)> = results[0].iter().flatten().cloned().collect();
        all.sort();
        assert_eq!(
            all,
            vec![("a".to_string(), 3), ("b".to_string(), 2), ("c".to_string(), 1)]
        );
    }
}
