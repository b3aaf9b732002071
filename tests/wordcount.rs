// End-to-end WordCount across 4 simulated hosts (spec.md §8's worked
// example): split each host's local lines into words, pre-phase
// locally-aggregates and routes by `hash(word) mod W` to a stream writer
// per destination, post-phase insert-or-reduces the inbound items, and
// every host's local partition is gathered back in-process (there is no
// distributed collective for variable-length results; `execute_local_mock`
// already hands every host's return value back to the caller, which plays
// that role here).

use std::sync::Arc;

use thrill::block::BlockPool;
use thrill::mem::Manager;
use thrill::net::Group;
use thrill::reduce::{PostPhase, PrePhase, ReduceConfig};
use thrill::stream::Multiplexer;

fn pool() -> Arc<BlockPool> {
    BlockPool::new(16 << 20, 32 << 20, Arc::new(Manager::new(16 << 20, 32 << 20)))
}

#[test]
fn wordcount_across_four_hosts_matches_expected_counts() {
    const NUM_HOSTS: usize = 4;
    let lines = ["a b", "b c c", "a", ""];

    let results = Group::execute_local_mock(NUM_HOSTS, move |group| {
        let my_rank = group.my_rank();
        let memory = Arc::new(Manager::new(16 << 20, 32 << 20));
        let pool = pool();
        let mux = Multiplexer::new(Arc::clone(&group), Arc::clone(&pool), 1);
        let stream_id = mux.allocate_stream_id();

        let writers: Vec<_> = (0..NUM_HOSTS).map(|dest| mux.writer(stream_id, my_rank, dest)).collect();
        let mut pre = PrePhase::new(writers, Arc::clone(&memory), ReduceConfig::default(), |a: i32, b: i32| a + b);

        for word in lines[my_rank].split_whitespace() {
            pre.insert(word.to_string(), 1).unwrap();
        }
        pre.finish().unwrap();

        let readers: Vec<_> = (0..NUM_HOSTS)
            .map(|src| {
                let mux = Arc::clone(&mux);
                std::thread::spawn(move || {
                    let mut reader = mux.reader(stream_id, my_rank, src);
                    let mut out = Vec::new();
                    while reader.has_next() {
                        out.push(reader.next::<(String, i32)>().unwrap());
                    }
                    out
                })
            })
            .collect();

        let mut post = PostPhase::new(pool, memory, 4, ReduceConfig::default(), |a: i32, b: i32| a + b);
        for handle in readers {
            for (key, value) in handle.join().unwrap() {
                post.insert(key, value).unwrap();
            }
        }
        post.finish().unwrap()
    });

    let mut all: Vec<(String, i32)> = results.into_iter().flatten().collect();
    all.sort();
    assert_eq!(
        all,
        vec![("a".to_string(), 2), ("b".to_string(), 2), ("c".to_string(), 2)]
    );
}
