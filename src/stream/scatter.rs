// Scatter (File -> stream, C6): spec.md §4.5 -- "Given a File and offsets
// o[0..W] ... Scatter writes items [o[i], o[i+1]) to destination worker i.
// The implementation uses GetItemBatch to move whole blocks without
// per-item re-serialization whenever possible; only the boundary items at
// o[i] are re-serialized." Grounded on `thrill/data/file.hpp`'s
// `Scatter`/`ScatterConsume`, whose block-batch + fallback shape
// `BlockReader::get_item_batch` already implements.

use std::sync::Arc;

use crate::block::serialization::Serialization;
use crate::block::{BlockWriter, File};
use crate::error::ThrillError;
use crate::stream::multiplexer::StreamSink;
use crate::Result;

/// Writes `file`'s items `[offsets[i], offsets[i+1])` to `writers[i]`, for
/// every `i`. `offsets` must have `writers.len() + 1` entries, start at 0,
/// and end at `file.num_items()`, matching `0 = o[0] <= ... <= o[W] =
/// file.num_items`. Does not close `writers`; the caller decides when every
/// destination has received its last Scatter call.
pub fn scatter<T: Serialization>(
    file: &Arc<File>,
    offsets: &[usize],
    writers: &mut [BlockWriter<StreamSink>],
) -> Result<()> {
    if offsets.len() != writers.len() + 1 {
        return Err(ThrillError::InvalidState(
            "scatter requires one offset boundary per writer plus one".into(),
        ));
    }
    if offsets[0] != 0 || *offsets.last().unwrap() != file.num_items() {
        return Err(ThrillError::InvalidState(
            "scatter offsets must span [0, file.num_items()]".into(),
        ));
    }
    for w in offsets.windows(2) {
        if w[0] > w[1] {
            return Err(ThrillError::InvalidState("scatter offsets must be non-decreasing".into()));
        }
    }

    let mut reader = file.get_keep_reader();
    for (i, writer) in writers.iter_mut().enumerate() {
        let count = offsets[i + 1] - offsets[i];
        if count == 0 {
            continue;
        }
        for block in reader.get_item_batch::<T>(count)? {
            writer.put_block(block)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockPool;
    use crate::mem::Manager;
    use crate::net::Group;
    use crate::stream::multiplexer::Multiplexer;
    use std::sync::Arc;

    fn pool() -> Arc<BlockPool> {
        BlockPool::new(1 << 20, 1 << 21, Arc::new(Manager::new(1 << 20, 1 << 21)))
    }

    #[test]
    fn scatter_delivers_contiguous_ranges_per_offset() {
        let results = Group::execute_local_mock(1, move |group| {
            let mux = Multiplexer::new(group, pool(), 4);
            let stream_id = mux.allocate_stream_id();

            let file = File::new(pool());
            {
                let mut writer = file.get_writer(16);
                for i in 0u32..10 {
                    writer.put(&i).unwrap();
                }
                writer.close().unwrap();
            }

            let readers: Vec<_> = (0..4)
                .map(|to| {
                    let mux = Arc::clone(&mux);
                    std::thread::spawn(move || {
                        let mut reader = mux.reader(stream_id, to, 0);
                        let mut out = Vec::new();
                        while reader.has_next() {
                            out.push(reader.next::<u32>().unwrap());
                        }
                        out
                    })
                })
                .collect();

            let mut writers: Vec<_> = (0..4).map(|to| mux.writer(stream_id, 0, to)).collect();
            scatter::<u32>(&file, &[0, 3, 3, 7, 10], &mut writers).unwrap();
            for mut w in writers {
                w.close().unwrap();
            }

            readers.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        assert_eq!(
            results[0],
            vec![vec![0, 1, 2], vec![], vec![3, 4, 5, 6], vec![7, 8, 9]]
        );
    }
}
