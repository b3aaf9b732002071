// Stream closure ordering (spec.md §8): with 4 workers each writing 100
// items to every other worker's inbound queue on one stream, every reader
// must eventually observe `has_next() == false` once all of its senders
// have closed, and the total item count received across all readers must
// match what was sent.

use std::sync::Arc;

use thrill::block::BlockPool;
use thrill::mem::Manager;
use thrill::net::Group;
use thrill::stream::Multiplexer;

fn pool() -> Arc<BlockPool> {
    BlockPool::new(4 << 20, 8 << 20, Arc::new(Manager::new(4 << 20, 8 << 20)))
}

#[test]
fn every_reader_terminates_once_all_its_senders_close() {
    const NUM_HOSTS: usize = 4;
    const ITEMS_PER_EDGE: u32 = 100;

    let results = Group::execute_local_mock(NUM_HOSTS, move |group| {
        let my_rank = group.my_rank();
        let mux = Multiplexer::new(Arc::clone(&group), pool(), 1);
        let stream_id = mux.allocate_stream_id();

        let readers: Vec<_> = (0..NUM_HOSTS)
            .map(|src| {
                let mux = Arc::clone(&mux);
                std::thread::spawn(move || {
                    let mut reader = mux.reader(stream_id, my_rank, src);
                    let mut count = 0usize;
                    while reader.has_next() {
                        reader.next::<u32>().unwrap();
                        count += 1;
                    }
                    count
                })
            })
            .collect();

        for dest in 0..NUM_HOSTS {
            let mut writer = mux.writer(stream_id, my_rank, dest);
            for i in 0..ITEMS_PER_EDGE {
                writer.put(&i).unwrap();
            }
            writer.close().unwrap();
        }

        readers.into_iter().map(|h| h.join().unwrap()).sum::<usize>()
    });

    for total in &results {
        assert_eq!(*total, NUM_HOSTS * ITEMS_PER_EDGE as usize);
    }
}
