// Block: an immutable view into a ByteBlock. Cheap to copy: it's a
// reference-counted byte block plus four integers.

use crate::block::byte_block::ByteBlockRef;

#[derive(Clone)]
pub struct Block {
    pub byte_block: ByteBlockRef,
    /// Start of this block's valid region within the ByteBlock.
    pub begin: usize,
    /// End (exclusive) of this block's valid region.
    pub end: usize,
    /// Byte offset within `[begin, end)` of the first *complete* item; items
    /// before it are the tail of an item that started in a previous block.
    pub first_item_offset: usize,
    /// Count of whole items whose start lies in `[first_item_offset, end)`.
    pub num_items: usize,
    /// Present only in self-verify builds: one type-tag byte recorded
    /// alongside the payload for cross-process type-safety checks.
    pub typecode: Option<u8>,
}

impl Block {
    pub fn new(
        byte_block: ByteBlockRef,
        begin: usize,
        end: usize,
        first_item_offset: usize,
        num_items: usize,
        typecode: Option<u8>,
    ) -> Self {
        debug_assert!(begin <= first_item_offset, "begin must precede first item");
        debug_assert!(first_item_offset <= end, "first item must precede end");
        debug_assert!(end <= byte_block.capacity(), "end exceeds ByteBlock capacity");
        Block {
            byte_block,
            begin,
            end,
            first_item_offset,
            num_items,
            typecode,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}
