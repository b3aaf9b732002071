// Asynchronous read/write request queue processed by a dedicated worker
// thread doing blocking pread/pwrite against a DiskManager. This is the Rust
// stand-in for the POSIX-AIO-or-thread dispatcher the spec allows (§4.9);
// completion callbacks run on the dispatcher thread, which is how the
// BlockPool resumes pin requests.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};

use crate::io::bid::Bid;
use crate::io::disk::DiskManager;
use crate::Result;

pub type IoCallback = Box<dyn FnOnce(Result<Option<Vec<u8>>>) + Send>;

enum IoRequest {
    Write {
        bid: Bid,
        data: Vec<u8>,
        callback: IoCallback,
    },
    Read {
        bid: Bid,
        callback: IoCallback,
    },
    Shutdown,
}

/// A single dispatcher thread draining a FIFO of read/write requests against
/// one `DiskManager`.
pub struct IoQueue {
    sender: Sender<IoRequest>,
    worker: Option<JoinHandle<()>>,
}

impl IoQueue {
    pub fn new(disks: Arc<DiskManager>) -> Self {
        let (sender, receiver) = unbounded::<IoRequest>();

        let worker = std::thread::Builder::new()
            .name("thrill-io-dispatcher".into())
            .spawn(move || {
                for request in receiver {
                    match request {
                        IoRequest::Write {
                            bid,
                            data,
                            callback,
                        } => {
                            let result = disks.write(bid, &data).map(|_| None);
                            callback(result);
                        }
                        IoRequest::Read { bid, callback } => {
                            let result = disks.read(bid).map(Some);
                            callback(result);
                        }
                        IoRequest::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn thrill-io-dispatcher thread");

        IoQueue {
            sender,
            worker: Some(worker),
        }
    }

    pub fn submit_write(&self, bid: Bid, data: Vec<u8>, callback: IoCallback) {
        let _ = self.sender.send(IoRequest::Write {
            bid,
            data,
            callback,
        });
    }

    pub fn submit_read(&self, bid: Bid, callback: IoCallback) {
        let _ = self.sender.send(IoRequest::Read { bid, callback });
    }
}

impl Drop for IoQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(IoRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::disk::AllocationStrategy;
    use std::sync::mpsc;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips_through_callbacks() {
        let dir = tempdir().unwrap();
        let disks = Arc::new(
            DiskManager::new(&[dir.path().join("disk0")], AllocationStrategy::Striping).unwrap(),
        );
        let queue = IoQueue::new(Arc::clone(&disks));
        let bid = disks.allocate(5);

        let (tx, rx) = mpsc::channel();
        queue.submit_write(
            bid,
            b"hello".to_vec(),
            Box::new(move |result| {
                tx.send(result).unwrap();
            }),
        );
        rx.recv().unwrap().unwrap();

        let (tx2, rx2) = mpsc::channel();
        queue.submit_read(
            bid,
            Box::new(move |result| {
                tx2.send(result).unwrap();
            }),
        );
        let data = rx2.recv().unwrap().unwrap().unwrap();
        assert_eq!(data, b"hello");
    }
}
