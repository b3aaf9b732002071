// BlockReader (C2, C4): drains a BlockSource one item at a time, or a whole
// run of items as raw Blocks via `get_item_batch` for zero-copy moves.
// Grounded on `thrill/data/block_reader.hpp`.
//
// Because BlockWriter never splits an item across two blocks (see
// writer.rs), every block this reader loads begins exactly on an item
// boundary; a single `next::<T>()` call never needs bytes from more than
// one block.

use std::sync::Arc;

use crate::block::block::Block;
use crate::block::pinned::PinnedBlock;
use crate::block::pool::BlockPool;
use crate::block::serialization::{GetBytes, Serialization};
use crate::block::sink_source::BlockSource;
use crate::error::ThrillError;
use crate::Result;

const VARIABLE_SIZE_TAG: u8 = 0xff;

pub struct BlockReader<S: BlockSource> {
    pool: Arc<BlockPool>,
    source: S,
    current: Option<PinnedBlock>,
    pos: usize,
    items_consumed_in_current: usize,
    self_verify: bool,
}

impl<S: BlockSource> BlockReader<S> {
    pub fn new(pool: Arc<BlockPool>, source: S, self_verify: bool) -> Self {
        BlockReader {
            pool,
            source,
            current: None,
            pos: 0,
            items_consumed_in_current: 0,
            self_verify,
        }
    }

    /// Returns true and leaves a non-empty block pinned as `current` if any
    /// bytes remain; advances through the source as needed. Never blocks
    /// except on source availability (a queue-backed source may itself
    /// block its caller; loading the next raw Block here never touches the
    /// network or disk beyond what pinning that Block requires).
    pub fn has_next(&mut self) -> bool {
        loop {
            if let Some(block) = &self.current {
                if self.pos < block.len() {
                    return true;
                }
            }
            match self.source.next_block() {
                Some(block) => {
                    let first_item_offset = block.first_item_offset;
                    let num_items = block.num_items;
                    let pinned = match PinnedBlock::acquire(Arc::clone(&self.pool), block) {
                        Ok(p) => p,
                        Err(_) => return false,
                    };
                    self.current = Some(pinned);
                    self.pos = first_item_offset;
                    self.items_consumed_in_current = 0;
                    let _ = num_items;
                }
                None => {
                    self.current = None;
                    return false;
                }
            }
        }
    }

    /// Deserializes and returns the next item. Errors if no items remain.
    pub fn next<T: Serialization>(&mut self) -> Result<T> {
        if !self.has_next() {
            return Err(ThrillError::Serialization(
                "Next called with no items remaining".into(),
            ));
        }
        if self.self_verify {
            let tag = self.get_u8()?;
            let expected = if T::IS_FIXED_SIZE {
                T::FIXED_SIZE as u8
            } else {
                VARIABLE_SIZE_TAG
            };
            if tag != expected {
                return Err(ThrillError::Serialization(format!(
                    "self-verify tag mismatch: expected {expected}, got {tag}"
                )));
            }
        }
        let item = T::deserialize(self)?;
        self.items_consumed_in_current += 1;
        Ok(item)
    }

    /// Returns a run of `n` items as raw, unparsed Blocks, reusing whole
    /// blocks by reference when a batch boundary aligns with a block
    /// boundary and re-serializing only the boundary items otherwise.
    /// Grounded on `thrill/data/stream.hpp`'s `Scatter`/`ScatterConsume`,
    /// which use exactly this call shape to move items between Writers
    /// without per-item deserialization.
    pub fn get_item_batch<T: Serialization>(&mut self, n: usize) -> Result<Vec<Block>> {
        let mut out = Vec::new();
        let mut remaining = n;

        while remaining > 0 {
            if !self.has_next() {
                return Err(ThrillError::Serialization(
                    "GetItemBatch requested more items than remain".into(),
                ));
            }
            let block = self.current.as_ref().unwrap().block().clone();
            let remaining_in_block = block.num_items - self.items_consumed_in_current;

            if remaining_in_block <= remaining {
                if self.items_consumed_in_current == 0 {
                    // Whole block, untouched: zero-copy reuse.
                    out.push(block);
                } else {
                    let sub = Block::new(
                        Arc::clone(&block.byte_block),
                        self.pos,
                        block.end,
                        0,
                        remaining_in_block,
                        block.typecode,
                    );
                    out.push(sub);
                }
                remaining -= remaining_in_block;
                self.pos = block.end;
                self.items_consumed_in_current = block.num_items;
                // Force the next has_next() call to advance the source.
            } else {
                // Boundary case: only part of this block belongs to the
                // batch. Re-serialize just those items into a fresh block.
                let mut scratch = Vec::new();
                let taken = remaining;
                for _ in 0..taken {
                    let item = self.next::<T>()?;
                    item.serialize(&mut ScratchSink(&mut scratch));
                }
                let len = scratch.len();
                let byte_block = self.pool.allocate_byte_block_with_data(scratch)?;
                self.pool.unpin_block(&byte_block);
                out.push(Block::new(byte_block, 0, len, 0, taken, None));
                remaining = 0;
            }
        }

        Ok(out)
    }
}

impl<S: BlockSource> GetBytes for BlockReader<S> {
    fn get_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.has_next() && !buf.is_empty() {
            return Err(ThrillError::Serialization("short read: source exhausted".into()));
        }
        let block = self
            .current
            .as_ref()
            .ok_or_else(|| ThrillError::Serialization("short read: no current block".into()))?;
        let end = self.pos + buf.len();
        if end > block.len() {
            return Err(ThrillError::Serialization(
                "short read: item bytes span block boundary".into(),
            ));
        }
        buf.copy_from_slice(&block[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}

struct ScratchSink<'a>(&'a mut Vec<u8>);

impl<'a> crate::block::serialization::PutBytes for ScratchSink<'a> {
    fn put_bytes(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::file::File;
    use crate::mem::Manager;

    fn pool() -> Arc<BlockPool> {
        BlockPool::new(1 << 20, 1 << 21, Arc::new(Manager::new(1 << 20, 1 << 21)))
    }

    #[test]
    fn get_item_batch_covers_whole_and_partial_blocks() {
        let file = File::new(pool());
        {
            // block_size 8 fits two u32s per block.
            let mut writer = file.get_writer(8);
            for i in 0u32..6 {
                writer.put(&i).unwrap();
            }
            writer.close().unwrap();
        }
        let mut reader = file.get_keep_reader();

        // First batch: exactly one whole block (2 items).
        let batch1 = reader.get_item_batch::<u32>(2).unwrap();
        assert_eq!(batch1.len(), 1);
        assert_eq!(batch1[0].num_items, 2);

        // Second batch: one whole block plus one boundary item from the
        // next block, forcing the re-serialize path.
        let batch2 = reader.get_item_batch::<u32>(3).unwrap();
        let total_items: usize = batch2.iter().map(|b| b.num_items).sum();
        assert_eq!(total_items, 3);

        // Remaining item.
        assert!(reader.has_next());
        assert_eq!(reader.next::<u32>().unwrap(), 5);
        assert!(!reader.has_next());
    }
}
