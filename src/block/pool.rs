// BlockPool (C1): single authority over the memory used for data blocks on
// a host. Enforces a soft limit (evict to external memory when exceeded) and
// a hard limit (block new allocations). Eviction runs in a dedicated thread
// driven by a condition variable the allocator signals when
// resident_bytes > soft_limit; least-recently-unpinned blocks are evicted
// first, ties broken by age (insertion order into the LRU queue already
// gives both, since a block is pushed onto it only once per unpin).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::block::byte_block::{ByteBlock, ByteBlockRef, Residency};
use crate::error::ThrillError;
use crate::io::{DiskManager, IoQueue};
use crate::mem::{AllocationSource, Manager};
use crate::Result;

struct PoolState {
    resident_bytes: u64,
    /// All blocks currently known to the pool, by id. Weak so that a block
    /// with no remaining Block/PinnedBlock references can be dropped; its
    /// Drop impl calls back into `release_byte_block` to clean this up.
    blocks: HashMap<u64, Weak<ByteBlock>>,
    /// Ids of currently-unpinned resident blocks, oldest-unpinned first.
    unpinned_lru: VecDeque<u64>,
}

pub struct BlockPool {
    soft_limit: u64,
    hard_limit: u64,
    memory: Arc<Manager>,
    state: Mutex<PoolState>,
    space_available: Condvar,
    next_id: AtomicU64,
    disks: Option<Arc<DiskManager>>,
    io_queue: Option<Arc<IoQueue>>,
    shutdown: AtomicBool,
    eviction_thread: Mutex<Option<JoinHandle<()>>>,
}

impl BlockPool {
    /// Construct a pool with no external-memory backing. Blocks can still be
    /// allocated up to `hard_limit`, but exceeding `soft_limit` has nowhere
    /// to spill to and the allocator blocks until unpinned blocks free up
    /// enough resident bytes on their own.
    pub fn new(soft_limit: u64, hard_limit: u64, memory: Arc<Manager>) -> Arc<Self> {
        Self::build(soft_limit, hard_limit, memory, None)
    }

    /// Construct a pool backed by external-memory storage, enabling the
    /// eviction thread to actually page blocks out.
    pub fn with_disks(
        soft_limit: u64,
        hard_limit: u64,
        memory: Arc<Manager>,
        disks: Arc<DiskManager>,
    ) -> Arc<Self> {
        let io_queue = Arc::new(IoQueue::new(Arc::clone(&disks)));
        Self::build(soft_limit, hard_limit, memory, Some((disks, io_queue)))
    }

    fn build(
        soft_limit: u64,
        hard_limit: u64,
        memory: Arc<Manager>,
        backing: Option<(Arc<DiskManager>, Arc<IoQueue>)>,
    ) -> Arc<Self> {
        let (disks, io_queue) = match backing {
            Some((d, q)) => (Some(d), Some(q)),
            None => (None, None),
        };

        let pool = Arc::new(BlockPool {
            soft_limit,
            hard_limit,
            memory,
            state: Mutex::new(PoolState {
                resident_bytes: 0,
                blocks: HashMap::new(),
                unpinned_lru: VecDeque::new(),
            }),
            space_available: Condvar::new(),
            next_id: AtomicU64::new(0),
            disks,
            io_queue,
            shutdown: AtomicBool::new(false),
            eviction_thread: Mutex::new(None),
        });

        let thread_pool = Arc::downgrade(&pool);
        let handle = std::thread::Builder::new()
            .name("thrill-block-pool-evictor".into())
            .spawn(move || eviction_loop(thread_pool))
            .expect("failed to spawn thrill-block-pool-evictor thread");
        *pool.eviction_thread.lock() = Some(handle);

        pool
    }

    pub fn soft_limit(&self) -> u64 {
        self.soft_limit
    }

    pub fn hard_limit(&self) -> u64 {
        self.hard_limit
    }

    pub fn resident_bytes(&self) -> u64 {
        self.state.lock().resident_bytes
    }

    /// Allocates a newly allocated, pinned, zero-item block. Blocks until
    /// evictions free space if the soft limit would be exceeded and eviction
    /// is configured; fails only with a configuration error when `size`
    /// exceeds the hard limit outright.
    pub fn allocate_byte_block(self: &Arc<Self>, size: usize) -> Result<ByteBlockRef> {
        if size as u64 > self.hard_limit {
            return Err(ThrillError::Configuration(format!(
                "requested block size {size} exceeds hard limit {}",
                self.hard_limit
            )));
        }

        let mut state = self.state.lock();
        loop {
            if state.resident_bytes + size as u64 <= self.hard_limit {
                break;
            }
            if state.unpinned_lru.is_empty() {
                if self.disks.is_none() {
                    // No external memory configured and nothing to evict:
                    // this is the hard-limit-exhaustion case.
                    return Err(ThrillError::OutOfMemory(format!(
                        "requested {size} bytes, {} resident, hard limit {}",
                        state.resident_bytes, self.hard_limit
                    )));
                }
                self.space_available.wait(&mut state);
                continue;
            }
            // Signal the eviction thread and wait for it to make progress.
            self.space_available.wait(&mut state);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let block = Arc::new(ByteBlock {
            id,
            capacity: size,
            pin_count: std::sync::atomic::AtomicUsize::new(1),
            residency: Mutex::new(Residency::Resident(Arc::new(vec![0u8; size]))),
            pool: Arc::downgrade(self),
        });

        state.resident_bytes += size as u64;
        state.blocks.insert(id, Arc::downgrade(&block));
        self.memory.track(AllocationSource::Blocks, size as u64);

        Ok(block)
    }

    /// Allocates a newly allocated, pinned, zero-item block whose resident
    /// bytes are `data` rather than zero-filled. Used by `BlockWriter` to
    /// hand a finished, already-serialized buffer straight to the pool
    /// without an extra copy into a zero-filled allocation first.
    pub fn allocate_byte_block_with_data(self: &Arc<Self>, data: Vec<u8>) -> Result<ByteBlockRef> {
        let size = data.len();
        if size as u64 > self.hard_limit {
            return Err(ThrillError::Configuration(format!(
                "requested block size {size} exceeds hard limit {}",
                self.hard_limit
            )));
        }

        let mut state = self.state.lock();
        loop {
            if state.resident_bytes + size as u64 <= self.hard_limit {
                break;
            }
            if state.unpinned_lru.is_empty() {
                if self.disks.is_none() {
                    return Err(ThrillError::OutOfMemory(format!(
                        "requested {size} bytes, {} resident, hard limit {}",
                        state.resident_bytes, self.hard_limit
                    )));
                }
                self.space_available.wait(&mut state);
                continue;
            }
            self.space_available.wait(&mut state);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let block = Arc::new(ByteBlock {
            id,
            capacity: size,
            pin_count: std::sync::atomic::AtomicUsize::new(1),
            residency: Mutex::new(Residency::Resident(Arc::new(data))),
            pool: Arc::downgrade(self),
        });

        state.resident_bytes += size as u64;
        state.blocks.insert(id, Arc::downgrade(&block));
        self.memory.track(AllocationSource::Blocks, size as u64);

        Ok(block)
    }

    /// Returns the resident bytes of a block the caller already holds a pin
    /// on (e.g. immediately after `allocate_byte_block`), without taking an
    /// additional pin. Panics if the block is not resident, which cannot
    /// happen for a block that is currently pinned.
    pub(crate) fn resident_snapshot(&self, block: &ByteBlockRef) -> Arc<Vec<u8>> {
        match &*block.residency.lock() {
            Residency::Resident(data) => Arc::clone(data),
            Residency::PagedOut(_) => {
                unreachable!("a pinned block can never be paged out")
            }
        }
    }

    /// Increases the pin count; if the block is currently paged out, issues
    /// a blocking read from external memory and returns once resident.
    pub fn pin_block(&self, block: &ByteBlockRef) -> Result<Arc<Vec<u8>>> {
        block.pin_count.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = self.state.lock();
            if let Some(pos) = state.unpinned_lru.iter().position(|id| *id == block.id) {
                state.unpinned_lru.remove(pos);
            }
        }

        let existing = {
            let residency = block.residency.lock();
            match &*residency {
                Residency::Resident(data) => Some(Arc::clone(data)),
                Residency::PagedOut(_) => None,
            }
        };
        if let Some(data) = existing {
            return Ok(data);
        }

        // Paged out: issue a blocking read and wait for it synchronously.
        let bid = match &*block.residency.lock() {
            Residency::PagedOut(bid) => *bid,
            Residency::Resident(_) => unreachable!("checked above"),
        };
        let io_queue = self
            .io_queue
            .as_ref()
            .ok_or_else(|| ThrillError::Internal("pin requires paging but no disks configured".into()))?;

        let (tx, rx) = mpsc::channel();
        io_queue.submit_read(
            bid,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        let bytes = rx
            .recv()
            .map_err(|_| ThrillError::Internal("io dispatcher dropped read request".into()))??
            .ok_or_else(|| ThrillError::Internal("read request returned no data".into()))?;

        let data = Arc::new(bytes);
        *block.residency.lock() = Residency::Resident(Arc::clone(&data));

        let mut state = self.state.lock();
        state.resident_bytes += block.capacity as u64;
        drop(state);
        self.memory.track(AllocationSource::Blocks, block.capacity as u64);

        Ok(data)
    }

    /// Decrements the pin count; when it reaches zero the block becomes
    /// eligible for eviction and the eviction thread is woken.
    pub fn unpin_block(&self, block: &ByteBlockRef) {
        let prev = block.pin_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "unpin on a block with zero pin count");
        if prev == 1 {
            let mut state = self.state.lock();
            state.unpinned_lru.push_back(block.id);
            drop(state);
            self.space_available.notify_all();
        }
    }

    /// Called from `ByteBlock::drop`. Releases bookkeeping and, if resident,
    /// returns RAM; if paged-out, frees the backing disk extent.
    pub(crate) fn release_byte_block(&self, id: u64, capacity: usize, residency: Residency) {
        let mut state = self.state.lock();
        state.blocks.remove(&id);
        if let Some(pos) = state.unpinned_lru.iter().position(|b| *b == id) {
            state.unpinned_lru.remove(pos);
        }
        match residency {
            Residency::Resident(_) => {
                state.resident_bytes = state.resident_bytes.saturating_sub(capacity as u64);
                drop(state);
                self.memory.untrack(AllocationSource::Blocks, capacity as u64);
            }
            Residency::PagedOut(bid) => {
                drop(state);
                if let Some(disks) = &self.disks {
                    disks.free(bid);
                }
            }
        }
        self.space_available.notify_all();
    }

    fn evict_one(self: &Arc<Self>) -> bool {
        let Some(disks) = &self.disks else {
            return false;
        };
        let Some(io_queue) = &self.io_queue else {
            return false;
        };

        let candidate = {
            let state = self.state.lock();
            state.unpinned_lru.front().copied()
        };
        let Some(id) = candidate else {
            return false;
        };

        let block = {
            let state = self.state.lock();
            state.blocks.get(&id).and_then(|w| w.upgrade())
        };
        let Some(block) = block else {
            // Already dropped; just clear the stale LRU entry.
            let mut state = self.state.lock();
            if state.unpinned_lru.front().copied() == Some(id) {
                state.unpinned_lru.pop_front();
            }
            return true;
        };

        if block.pin_count() > 0 {
            return false;
        }

        let data = {
            let residency = block.residency.lock();
            match &*residency {
                Residency::Resident(data) => Arc::clone(data),
                Residency::PagedOut(_) => return false,
            }
        };

        let bid = disks.allocate(block.capacity);
        let (tx, rx) = mpsc::channel();
        io_queue.submit_write(
            bid,
            data.as_ref().clone(),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        match rx.recv() {
            Ok(Ok(_)) => {}
            // Disk write failure is fatal: there is no recovery path for
            // lost intermediate data, so we log and leave the block
            // resident rather than silently losing it.
            other => {
                tracing::warn!("eviction write for block {} failed, keeping it resident: {:?}", id, other);
                return false;
            }
        }

        *block.residency.lock() = Residency::PagedOut(bid);

        let mut state = self.state.lock();
        if state.unpinned_lru.front().copied() == Some(id) {
            state.unpinned_lru.pop_front();
        }
        state.resident_bytes = state.resident_bytes.saturating_sub(block.capacity as u64);
        drop(state);

        self.memory
            .untrack(AllocationSource::Blocks, block.capacity as u64);
        self.space_available.notify_all();
        true
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.space_available.notify_all();
        if let Some(handle) = self.eviction_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn eviction_loop(pool: Weak<BlockPool>) {
    loop {
        let Some(pool) = pool.upgrade() else { return };
        if pool.shutdown.load(Ordering::SeqCst) {
            return;
        }

        let over_soft = pool.state.lock().resident_bytes > pool.soft_limit;
        if over_soft {
            if !pool.evict_one() {
                std::thread::yield_now();
            }
        } else {
            let mut state = pool.state.lock();
            pool.space_available.wait_for(&mut state, std::time::Duration::from_millis(50));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::AllocationStrategy;
    use tempfile::tempdir;

    fn manager() -> Arc<Manager> {
        Arc::new(Manager::new(1 << 20, 1 << 21))
    }

    #[test]
    fn allocate_pin_unpin_round_trip() {
        let pool = BlockPool::new(1 << 20, 1 << 21, manager());
        let block = pool.allocate_byte_block(128).unwrap();
        assert_eq!(block.pin_count(), 1);
        pool.unpin_block(&block);
        assert_eq!(block.pin_count(), 0);
        let data = pool.pin_block(&block).unwrap();
        assert_eq!(data.len(), 128);
        assert_eq!(block.pin_count(), 1);
        pool.shutdown();
    }

    #[test]
    fn hard_limit_without_disks_fails_allocation() {
        let pool = BlockPool::new(100, 100, manager());
        let _first = pool.allocate_byte_block(80).unwrap();
        let second = pool.allocate_byte_block(80);
        assert!(second.is_err());
        pool.shutdown();
    }

    #[test]
    fn oversized_allocation_is_a_configuration_error() {
        let pool = BlockPool::new(1000, 1000, manager());
        let result = pool.allocate_byte_block(2000);
        assert!(matches!(result, Err(ThrillError::Configuration(_))));
        pool.shutdown();
    }

    #[test]
    fn eviction_pages_out_under_soft_pressure() {
        let dir = tempdir().unwrap();
        let disks = Arc::new(
            DiskManager::new(&[dir.path().join("disk0")], AllocationStrategy::Striping).unwrap(),
        );
        let pool = BlockPool::with_disks(100, 1_000_000, manager(), disks);

        let block = pool.allocate_byte_block(80).unwrap();
        pool.unpin_block(&block);

        // Allocate past the soft limit; eviction thread should page the
        // first block out within a short, bounded wait.
        let _second = pool.allocate_byte_block(80).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while block.is_resident() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(!block.is_resident(), "block should have been evicted");
        pool.shutdown();
    }
}
