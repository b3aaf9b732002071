// FlowControlChannel (C5): extends the host-granularity collectives in
// `collective.rs` to worker granularity. Each worker thread publishes its
// value into a shared slot, one thread folds the W local values (in
// worker-id order, for non-commutative ops) and invokes the host-level
// collective, then fans the combined result back out. Grounded on
// `thrill/net/flow_control_channel.hpp`.

use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use crate::block::serialization::{from_bytes, to_bytes, Serialization};
use crate::net::collective;
use crate::net::group::Group;
use crate::Result;

pub struct FlowControlChannel {
    group: Arc<Group>,
    workers_per_host: usize,
    barrier_a: Barrier,
    barrier_b: Barrier,
    slots: Mutex<Vec<Vec<u8>>>,
}

impl FlowControlChannel {
    pub fn new(group: Arc<Group>, workers_per_host: usize) -> Arc<Self> {
        assert!(workers_per_host > 0);
        Arc::new(FlowControlChannel {
            group,
            workers_per_host,
            barrier_a: Barrier::new(workers_per_host),
            barrier_b: Barrier::new(workers_per_host),
            slots: Mutex::new(vec![Vec::new(); workers_per_host]),
        })
    }

    fn publish<T: Serialization>(&self, local_id: usize, value: &T) {
        self.slots.lock()[local_id] = to_bytes(value);
    }

    fn read_slot<T: Serialization>(&self, local_id: usize) -> Result<T> {
        let bytes = self.slots.lock()[local_id].clone();
        from_bytes(&bytes)
    }

    /// Runs the four-step worker-granularity pattern shared by every
    /// collective: publish, fold+host-op on the barrier leader, fan back
    /// out, second barrier. `fold` combines this host's W local values (in
    /// slot order, i.e. worker-id order) into the value the host-level
    /// collective should run on; `host_op` performs that host-level step
    /// and returns the value to publish back to every worker.
    fn run_pattern<T, Fold, HostOp>(
        &self,
        local_id: usize,
        value: T,
        fold: Fold,
        host_op: HostOp,
    ) -> Result<T>
    where
        T: Serialization + Clone,
        Fold: Fn(T, T) -> T,
        HostOp: FnOnce(&Group, T) -> Result<T>,
    {
        self.publish(local_id, &value);
        let wait = self.barrier_a.wait();

        if wait.is_leader() {
            let mut acc = self.read_slot::<T>(0)?;
            for i in 1..self.workers_per_host {
                let v = self.read_slot::<T>(i)?;
                acc = fold(acc, v);
            }
            let combined = host_op(&self.group, acc)?;
            self.publish(0, &combined);
        }

        self.barrier_b.wait();
        self.read_slot::<T>(0)
    }

    pub fn broadcast<T: Serialization + Clone>(
        &self,
        local_id: usize,
        value: T,
        root_worker: usize,
    ) -> Result<T> {
        let root_host = root_worker / self.workers_per_host;
        let root_local = root_worker % self.workers_per_host;

        self.publish(local_id, &value);
        let wait = self.barrier_a.wait();

        if wait.is_leader() {
            let root_value = self.read_slot::<T>(root_local)?;
            let combined = collective::broadcast(&self.group, root_value, root_host)?;
            self.publish(0, &combined);
        }

        self.barrier_b.wait();
        self.read_slot::<T>(0)
    }

    pub fn all_reduce<T, Op>(&self, local_id: usize, value: T, op: Op) -> Result<T>
    where
        T: Serialization + Clone + Send + 'static,
        Op: Fn(&T, &T) -> T + Clone + Send + 'static,
    {
        let fold_op = op.clone();
        let host_op_fn = op;
        self.run_pattern(
            local_id,
            value,
            move |a, b| fold_op(&a, &b),
            move |group, v| collective::all_reduce(group, v, &host_op_fn),
        )
    }

    pub fn reduce_to_root<T, Op>(
        &self,
        local_id: usize,
        value: T,
        op: Op,
        root_worker: usize,
    ) -> Result<T>
    where
        T: Serialization + Clone + Send + 'static,
        Op: Fn(&T, &T) -> T + Clone + Send + 'static,
    {
        let root_host = root_worker / self.workers_per_host;
        let fold_op = op.clone();
        let host_op_fn = op;
        self.run_pattern(
            local_id,
            value,
            move |a, b| fold_op(&a, &b),
            move |group, v| collective::reduce_to_root(group, v, &host_op_fn, root_host),
        )
    }

    /// `PrefixSum` is not foldable through the generic pattern (each worker
    /// needs a distinct result, not the same broadcast-back value), so it
    /// runs its own two-barrier protocol: fold the host's local prefix
    /// internally while publishing each worker's partial sum, run the
    /// host-level prefix sum on the leader's total, then let each worker
    /// compute its own final value from its local partial plus the
    /// exclusive host-level base.
    pub fn prefix_sum<T, Op>(&self, local_id: usize, value: T, op: Op, inclusive: bool) -> Result<T>
    where
        T: Serialization + Clone + Default,
        Op: Fn(&T, &T) -> T,
    {
        self.publish(local_id, &value);
        let wait = self.barrier_a.wait();

        // Every worker needs the exclusive prefix of local values strictly
        // before it, plus (for the inclusive case) its own value, plus the
        // exclusive base contributed by lower-ranked hosts. Compute the
        // host-level exclusive base on the leader and publish it into slot
        // 0; every worker then folds its own local exclusive prefix
        // on top, independently, after the second barrier.
        if wait.is_leader() {
            let mut host_local_total = self.read_slot::<T>(0)?;
            for i in 1..self.workers_per_host {
                let v = self.read_slot::<T>(i)?;
                host_local_total = op(&host_local_total, &v);
            }
            let host_exclusive_base =
                collective::prefix_sum(&self.group, host_local_total, &op, false)?;
            self.publish(0, &host_exclusive_base);
        }

        self.barrier_b.wait();
        let host_exclusive_base = self.read_slot::<T>(0)?;

        let mut local_exclusive = host_exclusive_base;
        for i in 0..local_id {
            let v = self.read_slot::<T>(i)?;
            local_exclusive = op(&local_exclusive, &v);
        }

        if inclusive {
            Ok(op(&local_exclusive, &value))
        } else {
            Ok(local_exclusive)
        }
    }

    pub fn barrier(&self, local_id: usize) -> Result<()> {
        self.run_pattern(
            local_id,
            1u64,
            |a, b| a + b,
            |group, v| collective::all_reduce(group, v, &|a: &u64, b: &u64| a + b),
        )
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::group::Group;

    fn run_multi_host(num_hosts: usize, workers_per_host: usize, f: impl Fn(Arc<FlowControlChannel>, usize) -> u64 + Send + Sync + Clone + 'static) -> Vec<u64> {
        let per_host_results = Group::execute_local_mock(num_hosts, move |group| {
            let flow = FlowControlChannel::new(group, workers_per_host);
            let handles: Vec<_> = (0..workers_per_host)
                .map(|local_id| {
                    let flow = Arc::clone(&flow);
                    let f = f.clone();
                    std::thread::spawn(move || f(flow, local_id))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });
        per_host_results.into_iter().flatten().collect()
    }

    #[test]
    fn all_reduce_sums_every_worker_on_every_host() {
        let results = run_multi_host(2, 3, |flow, local_id| {
            flow.all_reduce(local_id, 1u64, |a, b| a + b).unwrap()
        });
        assert_eq!(results, vec![6u64; 6]);
    }

    #[test]
    fn barrier_releases_every_worker() {
        let results = run_multi_host(2, 2, |flow, local_id| {
            flow.barrier(local_id).unwrap();
            local_id as u64
        });
        let mut sorted = results;
        sorted.sort();
        assert_eq!(sorted, vec![0, 0, 1, 1]);
    }
}
