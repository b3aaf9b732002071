// Benchmarks the BlockPool's allocate/pin/unpin round trip and its
// eviction path under soft-limit pressure. Grounded on the teacher's
// buffer-pool benchmark shape (allocate-then-release loops sized to cross
// a configured limit) adapted to ByteBlock/BlockPool.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use thrill::block::BlockPool;
use thrill::io::{AllocationStrategy, DiskManager};
use thrill::mem::Manager;

fn pool(soft: u64, hard: u64) -> Arc<BlockPool> {
    BlockPool::new(soft, hard, Arc::new(Manager::new(soft, hard)))
}

fn pool_with_disk(soft: u64, hard: u64, dir: &tempfile::TempDir) -> Arc<BlockPool> {
    let disk_path = dir.path().join("bench.disk");
    let disks = Arc::new(DiskManager::new(&[disk_path], AllocationStrategy::Striping).unwrap());
    BlockPool::with_disks(soft, hard, Arc::new(Manager::new(soft, hard)), disks)
}

fn bench_allocate_pin_unpin(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_pin_unpin");
    for block_size in [4 * 1024usize, 64 * 1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(block_size), &block_size, |b, &size| {
            let pool = pool(256 * 1024 * 1024, 512 * 1024 * 1024);
            b.iter(|| {
                let block = pool.allocate_byte_block(size).unwrap();
                pool.unpin_block(&block);
                black_box(block);
            });
        });
    }
    group.finish();
}

fn bench_eviction_under_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction_under_pressure");
    group.bench_function("allocate_past_soft_limit_with_disk_backing", |b| {
        // A small soft limit relative to block size forces the eviction
        // thread to page blocks out to disk before each new allocation's
        // resident-byte accounting settles back under the limit.
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with_disk(1024 * 1024, 64 * 1024 * 1024, &dir);
        b.iter(|| {
            let block = pool.allocate_byte_block(256 * 1024).unwrap();
            pool.unpin_block(&block);
            black_box(block);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_allocate_pin_unpin, bench_eviction_under_pressure);
criterion_main!(benches);
