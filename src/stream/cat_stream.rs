// CatStream (C6): a logical W-endpoint channel that preserves per-source
// FIFO order. Grounded on `thrill/data/cat_stream.hpp` and spec.md §4.5's
// "CatStream reader exposes either W independent readers ... or a single
// concatenating reader that drains source 0, then source 1, ...".

use std::sync::Arc;

use crate::block::{Block, BlockReader, BlockSource, BlockWriter};
use crate::stream::multiplexer::{Multiplexer, QueueSource, StreamSink};

/// One CatStream instance, identified by `stream_id`, shared by every
/// worker on the host. Writers and readers are opened lazily per endpoint
/// pair; the Multiplexer enforces the one-reader-per-triple rule.
pub struct CatStream {
    multiplexer: Arc<Multiplexer>,
    stream_id: u64,
    num_workers: usize,
}

impl CatStream {
    pub fn new(multiplexer: Arc<Multiplexer>, num_workers: usize) -> Self {
        let stream_id = multiplexer.allocate_stream_id();
        CatStream {
            multiplexer,
            stream_id,
            num_workers,
        }
    }

    pub fn id(&self) -> u64 {
        self.stream_id
    }

    /// A writer sending from `from_worker` to a single destination.
    pub fn writer(&self, from_worker: usize, to_worker: usize) -> BlockWriter<StreamSink> {
        self.multiplexer.writer(self.stream_id, from_worker, to_worker)
    }

    /// One writer per destination worker, the shape a DIA stage actually
    /// uses: every source worker opens W writers, one addressed to each
    /// worker in the computation.
    pub fn writers(&self, from_worker: usize) -> Vec<BlockWriter<StreamSink>> {
        (0..self.num_workers)
            .map(|to_worker| self.writer(from_worker, to_worker))
            .collect()
    }

    /// W independent per-source readers for `to_worker`, each preserving
    /// that source's own order. May be called only once.
    pub fn readers(&self, to_worker: usize) -> Vec<BlockReader<QueueSource>> {
        (0..self.num_workers)
            .map(|from_worker| self.multiplexer.reader(self.stream_id, to_worker, from_worker))
            .collect()
    }

    /// A single reader draining source 0 entirely, then source 1, ..., then
    /// source `num_workers - 1`. May be called only once.
    pub fn concat_reader(&self, to_worker: usize) -> BlockReader<ConcatSource> {
        let sources = (0..self.num_workers)
            .map(|from_worker| self.multiplexer.source(self.stream_id, to_worker, from_worker))
            .collect();
        BlockReader::new(self.multiplexer.pool(), ConcatSource { sources, index: 0 }, false)
    }
}

/// BlockSource draining a sequence of per-source QueueSources one after
/// another: exhausts `sources[index]` completely (a `None` terminator from
/// one worker's writer) before moving to `sources[index + 1]`.
pub struct ConcatSource {
    sources: Vec<QueueSource>,
    index: usize,
}

impl BlockSource for ConcatSource {
    fn next_block(&mut self) -> Option<Block> {
        while self.index < self.sources.len() {
            if let Some(block) = self.sources[self.index].next_block() {
                return Some(block);
            }
            self.index += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockPool;
    use crate::mem::Manager;
    use crate::net::Group;

    fn pool() -> Arc<BlockPool> {
        BlockPool::new(1 << 20, 1 << 21, Arc::new(Manager::new(1 << 20, 1 << 21)))
    }

    #[test]
    fn concat_reader_drains_sources_in_order() {
        let results = Group::execute_local_mock(1, move |group| {
            let mux = Multiplexer::new(group, pool(), 3);
            let cat = CatStream::new(Arc::clone(&mux), 3);

            let reader_stream_id = cat.id();
            let mux_reader = Arc::clone(&mux);
            let reader = std::thread::spawn(move || {
                let cat = CatStream {
                    multiplexer: mux_reader,
                    stream_id: reader_stream_id,
                    num_workers: 3,
                };
                let mut reader = cat.concat_reader(0);
                let mut out = Vec::new();
                while reader.has_next() {
                    out.push(reader.next::<u32>().unwrap());
                }
                out
            });

            for from in 0..3u32 {
                let mut writer = cat.writer(from as usize, 0);
                writer.put(&(from * 10)).unwrap();
                writer.put(&(from * 10 + 1)).unwrap();
                writer.close().unwrap();
            }

            reader.join().unwrap()
        });
        assert_eq!(results[0], vec![0, 1, 10, 11, 20, 21]);
    }
}
