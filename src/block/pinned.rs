// PinnedBlock: a Block plus a pin, guaranteeing a resident data pointer
// until dropped.

use std::ops::Deref;
use std::sync::Arc;

use crate::block::block::Block;
use crate::block::pool::BlockPool;
use crate::Result;

pub struct PinnedBlock {
    block: Block,
    data: Arc<Vec<u8>>,
    pool: Arc<BlockPool>,
}

impl PinnedBlock {
    /// Acquires a pin on `block`'s ByteBlock via `pool`, blocking until
    /// memory is available or a spill completes. Use this to re-pin a
    /// `Block` the caller does not already hold a pin on.
    pub fn acquire(pool: Arc<BlockPool>, block: Block) -> Result<Self> {
        let data = pool.pin_block(&block.byte_block)?;
        Ok(PinnedBlock { block, data, pool })
    }

    /// Wraps a `Block` whose ByteBlock was just returned by
    /// `BlockPool::allocate_byte_block`, which already holds one pin on the
    /// caller's behalf. Does not take a second pin.
    pub fn from_allocation(pool: Arc<BlockPool>, block: Block) -> Self {
        let data = pool.resident_snapshot(&block.byte_block);
        PinnedBlock { block, data, pool }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn into_block(self) -> Block {
        self.block.clone()
    }
}

impl Deref for PinnedBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[self.block.begin..self.block.end]
    }
}

impl Drop for PinnedBlock {
    fn drop(&mut self) {
        self.pool.unpin_block(&self.block.byte_block);
    }
}
