// ByteBlock: a pinned-or-pageable fixed-capacity byte buffer owned by a
// BlockPool. The data pointer is only guaranteed valid while resident or
// pinned; paged-out blocks hold only a BID until a pin request pages them
// back in.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::block::pool::BlockPool;
use crate::io::Bid;

pub(crate) enum Residency {
    Resident(Arc<Vec<u8>>),
    PagedOut(Bid),
}

pub struct ByteBlock {
    pub(crate) id: u64,
    pub(crate) capacity: usize,
    pub(crate) pin_count: AtomicUsize,
    pub(crate) residency: Mutex<Residency>,
    pub(crate) pool: Weak<BlockPool>,
}

pub type ByteBlockRef = Arc<ByteBlock>;

impl ByteBlock {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::SeqCst)
    }

    pub fn is_resident(&self) -> bool {
        matches!(*self.residency.lock(), Residency::Resident(_))
    }
}

impl Drop for ByteBlock {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let residency = match &*self.residency.lock() {
                Residency::Resident(data) => Residency::Resident(Arc::clone(data)),
                Residency::PagedOut(bid) => Residency::PagedOut(*bid),
            };
            pool.release_byte_block(self.id, self.capacity, residency);
        }
    }
}

impl std::fmt::Debug for ByteBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBlock")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("pin_count", &self.pin_count())
            .field("resident", &self.is_resident())
            .finish()
    }
}
