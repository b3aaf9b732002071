// External-memory block manager (C10): allocates disk blocks across
// configured disks and serves asynchronous read/write requests. The
// BlockPool uses this to page ByteBlocks out to and back in from external
// storage when under memory pressure.

mod bid;
mod disk;
mod queue;

pub use bid::Bid;
pub use disk::{AllocationStrategy, DiskManager};
pub use queue::{IoCallback, IoQueue};
