// Block data plane (C1-C4): ByteBlock/BlockPool own memory, Block is a
// cheap view over it, PinnedBlock guarantees residency, File/BlockWriter/
// BlockReader turn sequences of blocks into typed item streams.

mod block;
mod byte_block;
mod file;
mod pinned;
mod pool;
mod reader;
pub(crate) mod serialization;
mod sink_source;
mod writer;

pub use block::Block;
pub use byte_block::{ByteBlock, ByteBlockRef};
pub use file::{File, FileConsumeSource, FileKeepSource, FileSink};
pub use pinned::PinnedBlock;
pub use pool::BlockPool;
pub use reader::BlockReader;
pub use serialization::{GetBytes, PutBytes, Serialization};
pub use sink_source::{BlockSink, BlockSource};
pub use writer::BlockWriter;
