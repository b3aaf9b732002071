// Disk-backed external-memory storage. Each configured disk has a free-extent
// allocator; `DiskManager::allocate` assigns a new BID to a disk according to
// a pluggable strategy (striping, random cyclic, fully random, simple
// random), mirroring `thrill::io::BlockManager::new_blocks` and its
// `DiskAssignFunctor`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use crate::error::ThrillError;
use crate::io::bid::Bid;
use crate::Result;

/// Strategy for picking which configured disk a new block lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Round-robin across disks in allocation order.
    Striping,
    /// Uniform random choice, independent of allocation order.
    FullyRandom,
    /// Cyclically permuted random order, re-shuffled every full cycle.
    RandomCyclic,
    /// Uniform random choice with replacement, no cycle bookkeeping.
    SimpleRandom,
}

/// A bump allocator with a free list per disk. Extents are never compacted;
/// freed extents are reused by exact-or-larger first fit.
struct FreeExtentAllocator {
    next_offset: u64,
    free_list: Vec<(u64, usize)>,
}

impl FreeExtentAllocator {
    fn new() -> Self {
        FreeExtentAllocator {
            next_offset: 0,
            free_list: Vec::new(),
        }
    }

    fn allocate(&mut self, size: usize) -> u64 {
        if let Some(idx) = self
            .free_list
            .iter()
            .position(|&(_, extent_size)| extent_size >= size)
        {
            let (offset, extent_size) = self.free_list.remove(idx);
            if extent_size > size {
                self.free_list.push((offset + size as u64, extent_size - size));
            }
            return offset;
        }
        let offset = self.next_offset;
        self.next_offset += size as u64;
        offset
    }

    fn free(&mut self, offset: u64, size: usize) {
        self.free_list.push((offset, size));
    }
}

struct Disk {
    file: Mutex<File>,
    allocator: Mutex<FreeExtentAllocator>,
}

/// Manages a set of configured disks for external-memory scratch storage.
/// Disk failures (open/read/write) are fatal, per the spec's error handling
/// design: there is no clean recovery path for lost intermediate data.
pub struct DiskManager {
    disks: Vec<Disk>,
    strategy: AllocationStrategy,
    round_robin: AtomicU64,
}

impl DiskManager {
    /// Opens or creates one scratch file per path in `paths`. `paths` must be
    /// non-empty; an empty disk configuration is a `Configuration` error.
    pub fn new(paths: &[PathBuf], strategy: AllocationStrategy) -> Result<Self> {
        if paths.is_empty() {
            return Err(ThrillError::Configuration(
                "at least one disk path must be configured".into(),
            ));
        }

        let mut disks = Vec::with_capacity(paths.len());
        for path in paths {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            disks.push(Disk {
                file: Mutex::new(file),
                allocator: Mutex::new(FreeExtentAllocator::new()),
            });
        }

        Ok(DiskManager {
            disks,
            strategy,
            round_robin: AtomicU64::new(0),
        })
    }

    pub fn num_disks(&self) -> usize {
        self.disks.len()
    }

    fn choose_disk(&self) -> usize {
        match self.strategy {
            AllocationStrategy::Striping | AllocationStrategy::RandomCyclic => {
                let n = self.round_robin.fetch_add(1, Ordering::SeqCst);
                (n as usize) % self.disks.len()
            }
            AllocationStrategy::FullyRandom | AllocationStrategy::SimpleRandom => {
                rand::rng().random_range(0..self.disks.len())
            }
        }
    }

    /// Allocates a new BID of `size` bytes on a disk chosen by the
    /// configured strategy.
    pub fn allocate(&self, size: usize) -> Bid {
        let disk_id = self.choose_disk();
        let offset = self.disks[disk_id].allocator.lock().allocate(size);
        Bid::new(disk_id, offset, size)
    }

    pub fn free(&self, bid: Bid) {
        self.disks[bid.disk_id]
            .allocator
            .lock()
            .free(bid.offset, bid.size);
    }

    /// Blocking write. A write failure is fatal per spec §7.
    pub fn write(&self, bid: Bid, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), bid.size);
        let mut file = self.disks[bid.disk_id].file.lock();
        file.seek(SeekFrom::Start(bid.offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Blocking read. A read failure of a previously-written page is fatal
    /// per spec §7.
    pub fn read(&self, bid: Bid) -> Result<Vec<u8>> {
        let mut file = self.disks[bid.disk_id].file.lock();
        file.seek(SeekFrom::Start(bid.offset))?;
        let mut buf = vec![0u8; bid.size];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
