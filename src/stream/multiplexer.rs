// Multiplexer (C6): assigns StreamIds, routes finished blocks to the
// correct destination worker's inbound queue (loopback or cross-host), and
// runs the one receiver thread per peer host that parses incoming frames.
// Grounded on `thrill/data/stream.hpp` and the teacher's
// `src/networking/routing/dispatcher.rs` dispatch-table shape.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::block::{Block, BlockPool, BlockReader, BlockSink, BlockSource, BlockWriter, PinnedBlock};
use crate::net::Group;
use crate::stream::header::{decode_frame, encode_frame, WireHeader};
use crate::Result;

const DEFAULT_BLOCK_SIZE: usize = 2 * 1024 * 1024;

/// Traffic counters for every stream a Multiplexer routes, split into
/// `_net_` (cross-host) and `_int_` (loopback) variants. Grounded on
/// `thrill/data/stream.hpp`'s `tx_items_`/`rx_items_` family and the
/// teacher's `RwLockStats`/`RwLockStatsSnapshot` split: plain `AtomicU64`
/// counters updated with `Relaxed` ordering, exposed through a read-only
/// snapshot.
#[derive(Debug, Default)]
pub struct StreamData {
    tx_net_items: AtomicU64,
    tx_net_bytes: AtomicU64,
    tx_net_blocks: AtomicU64,
    tx_int_items: AtomicU64,
    tx_int_bytes: AtomicU64,
    tx_int_blocks: AtomicU64,
    rx_net_items: AtomicU64,
    rx_net_bytes: AtomicU64,
    rx_net_blocks: AtomicU64,
    rx_int_items: AtomicU64,
    rx_int_bytes: AtomicU64,
    rx_int_blocks: AtomicU64,
}

impl StreamData {
    fn record_tx(&self, net: bool, items: u64, bytes: u64) {
        let (i, b, n) = if net {
            (&self.tx_net_items, &self.tx_net_bytes, &self.tx_net_blocks)
        } else {
            (&self.tx_int_items, &self.tx_int_bytes, &self.tx_int_blocks)
        };
        i.fetch_add(items, Ordering::Relaxed);
        b.fetch_add(bytes, Ordering::Relaxed);
        n.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rx(&self, net: bool, items: u64, bytes: u64) {
        let (i, b, n) = if net {
            (&self.rx_net_items, &self.rx_net_bytes, &self.rx_net_blocks)
        } else {
            (&self.rx_int_items, &self.rx_int_bytes, &self.rx_int_blocks)
        };
        i.fetch_add(items, Ordering::Relaxed);
        b.fetch_add(bytes, Ordering::Relaxed);
        n.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StreamDataSnapshot {
        let tx_net_items = self.tx_net_items.load(Ordering::Relaxed);
        let tx_int_items = self.tx_int_items.load(Ordering::Relaxed);
        let tx_net_bytes = self.tx_net_bytes.load(Ordering::Relaxed);
        let tx_int_bytes = self.tx_int_bytes.load(Ordering::Relaxed);
        let tx_net_blocks = self.tx_net_blocks.load(Ordering::Relaxed);
        let tx_int_blocks = self.tx_int_blocks.load(Ordering::Relaxed);
        let rx_net_items = self.rx_net_items.load(Ordering::Relaxed);
        let rx_int_items = self.rx_int_items.load(Ordering::Relaxed);
        let rx_net_bytes = self.rx_net_bytes.load(Ordering::Relaxed);
        let rx_int_bytes = self.rx_int_bytes.load(Ordering::Relaxed);
        let rx_net_blocks = self.rx_net_blocks.load(Ordering::Relaxed);
        let rx_int_blocks = self.rx_int_blocks.load(Ordering::Relaxed);

        StreamDataSnapshot {
            tx_items: tx_net_items + tx_int_items,
            tx_bytes: tx_net_bytes + tx_int_bytes,
            tx_blocks: tx_net_blocks + tx_int_blocks,
            tx_net_items,
            tx_net_bytes,
            tx_net_blocks,
            tx_int_items,
            tx_int_bytes,
            tx_int_blocks,
            rx_items: rx_net_items + rx_int_items,
            rx_bytes: rx_net_bytes + rx_int_bytes,
            rx_blocks: rx_net_blocks + rx_int_blocks,
            rx_net_items,
            rx_net_bytes,
            rx_net_blocks,
            rx_int_items,
            rx_int_bytes,
            rx_int_blocks,
        }
    }
}

/// Read-only point-in-time copy of a Multiplexer's `StreamData` counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamDataSnapshot {
    pub tx_items: u64,
    pub tx_bytes: u64,
    pub tx_blocks: u64,
    pub tx_net_items: u64,
    pub tx_net_bytes: u64,
    pub tx_net_blocks: u64,
    pub tx_int_items: u64,
    pub tx_int_bytes: u64,
    pub tx_int_blocks: u64,
    pub rx_items: u64,
    pub rx_bytes: u64,
    pub rx_blocks: u64,
    pub rx_net_items: u64,
    pub rx_net_bytes: u64,
    pub rx_net_blocks: u64,
    pub rx_int_items: u64,
    pub rx_int_bytes: u64,
    pub rx_int_blocks: u64,
}

/// Identifies one logical inbound queue: the blocks flowing from
/// `from_worker` to `to_worker` on stream `stream_id`.
type QueueKey = (u64, usize, usize);

struct QueueEntry {
    sender: Sender<Option<Block>>,
    receiver: Mutex<Option<Receiver<Option<Block>>>>,
}

pub struct Multiplexer {
    group: Arc<Group>,
    pool: Arc<BlockPool>,
    workers_per_host: usize,
    next_stream_id: AtomicU64,
    queues: DashMap<QueueKey, Arc<QueueEntry>>,
    stats: StreamData,
}

impl Multiplexer {
    pub fn new(group: Arc<Group>, pool: Arc<BlockPool>, workers_per_host: usize) -> Arc<Self> {
        let mux = Arc::new(Multiplexer {
            group,
            pool,
            workers_per_host,
            next_stream_id: AtomicU64::new(0),
            queues: DashMap::new(),
            stats: StreamData::default(),
        });

        for peer in 0..mux.group.size() {
            if peer == mux.group.my_rank() {
                continue;
            }
            mux.spawn_receiver(peer);
        }

        mux
    }

    /// Allocates the next StreamId. Every worker must call this the same
    /// number of times in the same order (guaranteed by identical DIA
    /// graph traversal across workers), so a local counter is sufficient:
    /// no cross-host negotiation is required.
    pub fn allocate_stream_id(&self) -> u64 {
        self.next_stream_id.fetch_add(1, Ordering::SeqCst)
    }

    fn entry(&self, key: QueueKey) -> Arc<QueueEntry> {
        Arc::clone(self.queues.entry(key).or_insert_with(|| {
            let (sender, receiver) = unbounded();
            Arc::new(QueueEntry {
                sender,
                receiver: Mutex::new(Some(receiver)),
            })
        }).value())
    }

    /// Opens a BlockWriter for stream `stream_id`, sending from worker
    /// `from_worker` (global id) to worker `to_worker` (global id).
    pub fn writer(self: &Arc<Self>, stream_id: u64, from_worker: usize, to_worker: usize) -> BlockWriter<StreamSink> {
        BlockWriter::new(
            Arc::clone(&self.pool),
            StreamSink {
                multiplexer: Arc::clone(self),
                stream_id,
                from_worker,
                to_worker,
            },
            DEFAULT_BLOCK_SIZE,
            false,
        )
    }

    /// Opens a BlockReader draining the queue of blocks addressed to
    /// `to_worker` from `from_worker` on stream `stream_id`. May be called
    /// only once per `(stream_id, to_worker, from_worker)` triple.
    pub fn reader(self: &Arc<Self>, stream_id: u64, to_worker: usize, from_worker: usize) -> BlockReader<QueueSource> {
        BlockReader::new(Arc::clone(&self.pool), self.source(stream_id, to_worker, from_worker), false)
    }

    /// Takes ownership of the raw inbound queue for `(stream_id, to_worker,
    /// from_worker)`, for callers (CatStream's concatenating reader,
    /// MixStream) that need to combine several sources themselves instead
    /// of going through one `BlockReader` per source.
    pub fn source(&self, stream_id: u64, to_worker: usize, from_worker: usize) -> QueueSource {
        let entry = self.entry((stream_id, to_worker, from_worker));
        let receiver = entry
            .receiver
            .lock()
            .take()
            .expect("reader already constructed for this (stream, to, from) triple");
        QueueSource { receiver }
    }

    pub fn pool(&self) -> Arc<BlockPool> {
        Arc::clone(&self.pool)
    }

    pub fn workers_per_host(&self) -> usize {
        self.workers_per_host
    }

    /// Read-only snapshot of this host's cumulative stream traffic, split
    /// into cross-host (`_net_`) and loopback (`_int_`) variants.
    pub fn stream_stats(&self) -> StreamDataSnapshot {
        self.stats.snapshot()
    }

    fn route_block(&self, stream_id: u64, from_worker: usize, to_worker: usize, block: Block) {
        let to_host = to_worker / self.workers_per_host;
        if to_host == self.group.my_rank() {
            let items = block.num_items as u64;
            let bytes = block.len() as u64;
            self.stats.record_tx(false, items, bytes);
            self.stats.record_rx(false, items, bytes);
            let entry = self.entry((stream_id, to_worker, from_worker));
            let _ = entry.sender.send(Some(block));
        } else {
            let payload = match block_bytes(&self.pool, &block) {
                Ok(p) => p,
                Err(_) => return,
            };
            let header = WireHeader {
                stream_id,
                from_worker: from_worker as u32,
                to_worker: to_worker as u32,
                num_items: block.num_items as u64,
                first_item_offset: block.first_item_offset as u32,
                payload_len: payload.len() as u32,
                typecode: block.typecode,
            };
            self.stats.record_tx(true, block.num_items as u64, payload.len() as u64);
            let frame = encode_frame(&header, &payload);
            let _ = self.group.send_bytes(to_host, &frame);
        }
    }

    fn route_close(&self, stream_id: u64, from_worker: usize, to_worker: usize) {
        let to_host = to_worker / self.workers_per_host;
        if to_host == self.group.my_rank() {
            let entry = self.entry((stream_id, to_worker, from_worker));
            let _ = entry.sender.send(None);
        } else {
            let header = WireHeader {
                stream_id,
                from_worker: from_worker as u32,
                to_worker: to_worker as u32,
                num_items: 0,
                first_item_offset: 0,
                payload_len: 0,
                typecode: None,
            };
            let frame = encode_frame(&header, &[]);
            let _ = self.group.send_bytes(to_host, &frame);
        }
    }

    fn spawn_receiver(self: &Arc<Self>, peer_host: usize) {
        let mux = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("thrill-stream-rx-{peer_host}"))
            .spawn(move || loop {
                let frame = match mux.group.recv_bytes(peer_host) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!("stream receiver for host {} exiting: {}", peer_host, e);
                        return;
                    }
                };
                let (header, payload) = match decode_frame(&frame) {
                    Ok(x) => x,
                    Err(_) => continue,
                };
                let key = (
                    header.stream_id,
                    header.to_worker as usize,
                    header.from_worker as usize,
                );
                let entry = mux.entry(key);

                if header.num_items == 0 && payload.is_empty() {
                    let _ = entry.sender.send(None);
                    continue;
                }

                match mux.pool.allocate_byte_block_with_data(payload.to_vec()) {
                    Ok(byte_block) => {
                        mux.pool.unpin_block(&byte_block);
                        mux.stats.record_rx(true, header.num_items, header.payload_len as u64);
                        let block = Block::new(
                            byte_block,
                            0,
                            header.payload_len as usize,
                            header.first_item_offset as usize,
                            header.num_items as usize,
                            header.typecode,
                        );
                        let _ = entry.sender.send(Some(block));
                    }
                    Err(_) => return,
                }
            })
            .expect("failed to spawn thrill-stream-rx thread");
    }
}

fn block_bytes(pool: &Arc<BlockPool>, block: &Block) -> Result<Vec<u8>> {
    let pinned = PinnedBlock::acquire(Arc::clone(pool), block.clone())?;
    Ok(pinned.to_vec())
}

/// BlockSink side of a stream writer: routes finished blocks to their
/// destination worker's inbound queue, locally or over the network.
pub struct StreamSink {
    multiplexer: Arc<Multiplexer>,
    stream_id: u64,
    from_worker: usize,
    to_worker: usize,
}

impl BlockSink for StreamSink {
    fn append(&mut self, block: Block) {
        self.multiplexer
            .route_block(self.stream_id, self.from_worker, self.to_worker, block);
    }

    fn close(&mut self) {
        self.multiplexer
            .route_close(self.stream_id, self.from_worker, self.to_worker);
    }
}

/// BlockSource side of a stream reader: drains the crossbeam channel a
/// StreamSink (local) or the receiver thread (remote) feeds. `None` is the
/// end-of-stream terminator.
pub struct QueueSource {
    receiver: Receiver<Option<Block>>,
}

impl BlockSource for QueueSource {
    fn next_block(&mut self) -> Option<Block> {
        match self.receiver.recv() {
            Ok(inner) => inner,
            Err(_) => None,
        }
    }
}

impl QueueSource {
    /// Exposes the raw channel for callers (MixStream) that need to select
    /// over several sources' arrival order rather than draining one at a
    /// time.
    pub(crate) fn into_receiver(self) -> Receiver<Option<Block>> {
        self.receiver
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
    fn loopback_writer_feeds_matching_reader() {
        let results = Group::execute_local_mock(1, move |group| {
            let mux = Multiplexer::new(group, pool(), 2);
            let stream_id = mux.allocate_stream_id();

            let mux_reader = Arc::clone(&mux);
            let reader_thread = std::thread::spawn(move || {
                let mut reader = mux_reader.reader(stream_id, 1, 0);
                let mut out = Vec::new();
                while reader.has_next() {
                    out.push(reader.next::<u32>().unwrap());
                }
                out
            });

            let mut writer = mux.writer(stream_id, 0, 1);
            for i in 0u32..5 {
                writer.put(&i).unwrap();
            }
            writer.close().unwrap();

            reader_thread.join().unwrap()
        });
        assert_eq!(results[0], vec![0u32, 1, 2, 3, 4]);
    }

    #[test]
    fn loopback_traffic_is_counted_as_internal() {
        let results = Group::execute_local_mock(1, move |group| {
            let mux = Multiplexer::new(group, pool(), 2);
            let stream_id = mux.allocate_stream_id();

            let mux_reader = Arc::clone(&mux);
            let reader_thread = std::thread::spawn(move || {
                let mut reader = mux_reader.reader(stream_id, 1, 0);
                while reader.has_next() {
                    reader.next::<u32>().unwrap();
                }
            });

            let mut writer = mux.writer(stream_id, 0, 1);
            writer.put(&1u32).unwrap();
            writer.put(&2u32).unwrap();
            writer.close().unwrap();
            reader_thread.join().unwrap();

            let stats = mux.stream_stats();
            assert_eq!(stats.tx_net_blocks, 0);
            assert_eq!(stats.rx_net_blocks, 0);
            assert!(stats.tx_int_items >= 2);
            assert_eq!(stats.tx_items, stats.tx_int_items);
            assert_eq!(stats.rx_items, stats.rx_int_items);
        });
        let _ = results;
    }
}
