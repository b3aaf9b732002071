// File (C3): an ordered, append-only sequence of Blocks. Append-only while
// its single Writer is open; immutable and shareable afterward. An empty
// File is a legal, readable value.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::block::Block;
use crate::block::pool::BlockPool;
use crate::block::reader::BlockReader;
use crate::block::sink_source::{BlockSink, BlockSource};
use crate::block::writer::BlockWriter;

struct FileInner {
    blocks: Vec<Block>,
    num_items: usize,
    size_bytes: u64,
    writer_open: bool,
}

/// An ordered sequence of Blocks backed by a BlockPool. Grounded on
/// `thrill/core/file_io.hpp`'s File, which plays the same role: scratch
/// storage a Writer appends to and one or more Readers later drain.
pub struct File {
    pool: Arc<BlockPool>,
    inner: Mutex<FileInner>,
}

impl File {
    pub fn new(pool: Arc<BlockPool>) -> Arc<Self> {
        Arc::new(File {
            pool,
            inner: Mutex::new(FileInner {
                blocks: Vec::new(),
                num_items: 0,
                size_bytes: 0,
                writer_open: false,
            }),
        })
    }

    /// Opens a Writer over this File. Panics if a Writer is already open;
    /// a File supports exactly one open Writer at a time, matching the
    /// "append-only during the life of its single open Writer" contract.
    pub fn get_writer(self: &Arc<Self>, block_size: usize) -> BlockWriter<FileSink> {
        let mut inner = self.inner.lock();
        assert!(!inner.writer_open, "File already has an open Writer");
        inner.writer_open = true;
        drop(inner);
        BlockWriter::new(
            Arc::clone(&self.pool),
            FileSink {
                file: Arc::clone(self),
            },
            block_size,
            false,
        )
    }

    pub fn get_writer_self_verify(self: &Arc<Self>, block_size: usize) -> BlockWriter<FileSink> {
        let mut inner = self.inner.lock();
        assert!(!inner.writer_open, "File already has an open Writer");
        inner.writer_open = true;
        drop(inner);
        BlockWriter::new(
            Arc::clone(&self.pool),
            FileSink {
                file: Arc::clone(self),
            },
            block_size,
            true,
        )
    }

    /// Multi-pass reader: blocks stay in the File, so any number of
    /// `get_keep_reader` readers may be created and driven independently.
    pub fn get_keep_reader(self: &Arc<Self>) -> BlockReader<FileKeepSource> {
        BlockReader::new(
            Arc::clone(&self.pool),
            FileKeepSource {
                file: Arc::clone(self),
                pos: 0,
            },
            false,
        )
    }

    /// Single-pass reader that removes each Block from the File as it is
    /// handed out, releasing that Block's reference as soon as the reader
    /// drops it (letting the BlockPool reclaim it sooner).
    pub fn get_consume_reader(self: &Arc<Self>) -> BlockReader<FileConsumeSource> {
        let remaining = {
            let mut inner = self.inner.lock();
            VecDeque::from(std::mem::take(&mut inner.blocks))
        };
        BlockReader::new(
            Arc::clone(&self.pool),
            FileConsumeSource { remaining },
            false,
        )
    }

    pub fn num_items(&self) -> usize {
        self.inner.lock().num_items
    }

    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().size_bytes
    }

    pub fn num_blocks(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    fn close_writer(&self) {
        self.inner.lock().writer_open = false;
    }
}

/// `BlockSink` side of a File's Writer: appends finished blocks to the
/// File's Vec and updates its item/byte counters.
pub struct FileSink {
    file: Arc<File>,
}

impl BlockSink for FileSink {
    fn append(&mut self, block: Block) {
        let mut inner = self.file.inner.lock();
        inner.num_items += block.num_items;
        inner.size_bytes += block.len() as u64;
        inner.blocks.push(block);
    }

    fn close(&mut self) {
        self.file.close_writer();
    }
}

/// Non-destructive `BlockSource`: replays the File's Blocks from an
/// independent cursor, so multiple keep-readers can coexist.
pub struct FileKeepSource {
    file: Arc<File>,
    pos: usize,
}

impl BlockSource for FileKeepSource {
    fn next_block(&mut self) -> Option<Block> {
        let inner = self.file.inner.lock();
        let block = inner.blocks.get(self.pos).cloned();
        if block.is_some() {
            self.pos += 1;
        }
        block
    }
}

/// Destructive `BlockSource`: the Blocks were already removed from the File
/// when this reader was constructed (see `File::get_consume_reader`), so
/// draining this queue is the only reference to them.
pub struct FileConsumeSource {
    remaining: VecDeque<Block>,
}

impl BlockSource for FileConsumeSource {
    fn next_block(&mut self) -> Option<Block> {
        self.remaining.pop_front()
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
    fn empty_file_is_valid_and_readable() {
        let file = File::new(pool());
        assert_eq!(file.num_items(), 0);
        assert_eq!(file.size_bytes(), 0);
        let mut reader = file.get_keep_reader();
        assert!(!reader.has_next());
    }

    #[test]
    fn write_then_keep_read_round_trips_items() {
        let file = File::new(pool());
        {
            let mut writer = file.get_writer(64);
            for i in 0u32..10 {
                writer.put(&i).unwrap();
            }
            writer.close().unwrap();
        }
        assert_eq!(file.num_items(), 10);

        let mut reader = file.get_keep_reader();
        let mut out = Vec::new();
        while reader.has_next() {
            out.push(reader.next::<u32>().unwrap());
        }
        assert_eq!(out, (0u32..10).collect::<Vec<_>>());

        // A second keep reader sees the same data independently.
        let mut reader2 = file.get_keep_reader();
        let mut out2 = Vec::new();
        while reader2.has_next() {
            out2.push(reader2.next::<u32>().unwrap());
        }
        assert_eq!(out2, out);
    }

    #[test]
    fn consume_reader_drains_the_file() {
        let file = File::new(pool());
        {
            let mut writer = file.get_writer(1024);
            for i in 0u32..5 {
                writer.put(&i).unwrap();
            }
            writer.close().unwrap();
        }
        let mut reader = file.get_consume_reader();
        let mut out = Vec::new();
        while reader.has_next() {
            out.push(reader.next::<u32>().unwrap());
        }
        assert_eq!(out, (0u32..5).collect::<Vec<_>>());
        assert_eq!(file.num_blocks(), 0);
    }

    #[test]
    fn oversized_item_gets_its_own_block() {
        let file = File::new(pool());
        let big = "x".repeat(200);
        {
            let mut writer = file.get_writer(16);
            writer.put(&big).unwrap();
            writer.put(&"y".to_string()).unwrap();
            writer.close().unwrap();
        }
        let mut reader = file.get_keep_reader();
        assert_eq!(reader.next::<String>().unwrap(), big);
        assert_eq!(reader.next::<String>().unwrap(), "y");
        assert!(!reader.has_next());
    }
}
