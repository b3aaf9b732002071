// Process-wide tracked memory accounting and aligned allocation.
//
// A single `Manager` tracks bytes allocated per tagged category and exposes
// a shared atomic `memory_exceeded` flag that other subsystems poll at
// natural boundaries (end of an inbound block, end of an inserted reduce
// item) to decide whether to spill.

mod allocator;

pub use allocator::{AlignedBuffer, AllocationSource};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tracks bytes allocated across tagged categories against a soft limit. Does
/// not itself perform allocation for ordinary Rust values; `BlockPool` and
/// the reduce hash tables call `track`/`untrack` around their own storage.
pub struct Manager {
    soft_limit: u64,
    hard_limit: u64,
    blocks: AtomicU64,
    network: AtomicU64,
    reduce_tables: AtomicU64,
    user: AtomicU64,
    memory_exceeded: AtomicBool,
}

impl Manager {
    pub fn new(soft_limit: u64, hard_limit: u64) -> Self {
        Manager {
            soft_limit,
            hard_limit,
            blocks: AtomicU64::new(0),
            network: AtomicU64::new(0),
            reduce_tables: AtomicU64::new(0),
            user: AtomicU64::new(0),
            memory_exceeded: AtomicBool::new(false),
        }
    }

    fn counter(&self, source: AllocationSource) -> &AtomicU64 {
        match source {
            AllocationSource::Blocks => &self.blocks,
            AllocationSource::Network => &self.network,
            AllocationSource::ReduceTables => &self.reduce_tables,
            AllocationSource::User => &self.user,
        }
    }

    /// Record `size` bytes allocated under `source`. Updates the shared
    /// `memory_exceeded` flag; never fails (the hard limit is enforced by
    /// `BlockPool::allocate_byte_block`, not here).
    pub fn track(&self, source: AllocationSource, size: u64) {
        self.counter(source).fetch_add(size, Ordering::SeqCst);
        self.refresh_pressure_flag();
    }

    pub fn untrack(&self, source: AllocationSource, size: u64) {
        self.counter(source).fetch_sub(size, Ordering::SeqCst);
        self.refresh_pressure_flag();
    }

    fn refresh_pressure_flag(&self) {
        let exceeded = self.total_tracked() > self.soft_limit;
        self.memory_exceeded.store(exceeded, Ordering::SeqCst);
    }

    pub fn total_tracked(&self) -> u64 {
        self.blocks.load(Ordering::SeqCst)
            + self.network.load(Ordering::SeqCst)
            + self.reduce_tables.load(Ordering::SeqCst)
            + self.user.load(Ordering::SeqCst)
    }

    /// `true` once total tracked bytes exceeds the soft limit. Operator code
    /// polls this at natural boundaries and spills the largest partition it
    /// owns when set.
    pub fn memory_exceeded(&self) -> bool {
        self.memory_exceeded.load(Ordering::SeqCst)
    }

    pub fn soft_limit(&self) -> u64 {
        self.soft_limit
    }

    pub fn hard_limit(&self) -> u64 {
        self.hard_limit
    }

    /// `true` if allocating `additional` more bytes under `source` would
    /// exceed the hard limit.
    pub fn would_exceed_hard_limit(&self, additional: u64) -> bool {
        self.total_tracked() + additional > self.hard_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_flag_tracks_soft_limit() {
        let m = Manager::new(100, 200);
        assert!(!m.memory_exceeded());
        m.track(AllocationSource::Blocks, 150);
        assert!(m.memory_exceeded());
        m.untrack(AllocationSource::Blocks, 100);
        assert!(!m.memory_exceeded());
    }

    #[test]
    fn hard_limit_check_is_advisory_not_enforced_here() {
        let m = Manager::new(100, 200);
        m.track(AllocationSource::Blocks, 190);
        assert!(m.would_exceed_hard_limit(50));
        assert!(!m.would_exceed_hard_limit(5));
    }
}
