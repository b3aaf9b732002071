// Collective operations over a Group (C5), at host granularity: one call
// per host, run by whichever single worker thread owns the Group for that
// call (FlowControlChannel is what extends these to worker granularity).
// Grounded on `c7a/net/net-group.hpp`'s hypercube `AllReduce` and the
// pointer-doubling/binomial-tree shapes `spec.md` §4.4 names explicitly.

use crate::block::serialization::{from_bytes, to_bytes, Serialization};
use crate::net::group::Group;
use crate::Result;

/// Binomial-tree broadcast from `root` to every other host. Standard
/// MPI-style algorithm: a relative-rank renumbering makes `root` rank 0,
/// each host receives from exactly one source bit and forwards to every
/// higher bit still in range.
pub fn broadcast<T: Serialization + Clone>(group: &Group, value: T, root: usize) -> Result<T> {
    let size = group.size();
    if size == 1 {
        return Ok(value);
    }
    let rank = group.my_rank();
    let relative_rank = (rank + size - root) % size;

    let mut value = value;
    let mut mask = 1usize;
    while mask < size {
        if relative_rank & mask != 0 {
            let relative_src = relative_rank & !mask;
            let src = (relative_src + root) % size;
            value = from_bytes(&group.recv_bytes(src)?)?;
            break;
        }
        mask <<= 1;
    }

    // Root's relative_rank is 0, which never matches the loop above, so for
    // root `mask` grows all the way to the smallest power of two >= size
    // rather than stopping at a received bit. Either way, halving once now
    // gives the correct starting point to fan the value out downward.
    mask >>= 1;
    while mask > 0 {
        if relative_rank + mask < size {
            let dest = (relative_rank + mask + root) % size;
            group.send_bytes(dest, &to_bytes(&value))?;
        }
        mask >>= 1;
    }

    Ok(value)
}

/// Folds `value` across all hosts with `op`, in host-rank order, and
/// returns the result only on `root`'s call (other hosts get their own
/// input value back unchanged; this is `ReduceToRoot` used as a
/// building block, not the full `AllReduce`).
pub fn reduce_to_root<T, Op>(group: &Group, value: T, op: &Op, root: usize) -> Result<T>
where
    T: Serialization + Clone,
    Op: Fn(&T, &T) -> T,
{
    let size = group.size();
    let rank = group.my_rank();
    if size == 1 {
        return Ok(value);
    }

    if rank == root {
        let mut acc = value;
        for src in 0..size {
            if src == root {
                continue;
            }
            let received: T = from_bytes(&group.recv_bytes(src)?)?;
            acc = op(&acc, &received);
        }
        Ok(acc)
    } else {
        group.send_bytes(root, &to_bytes(&value))?;
        Ok(value)
    }
}

/// Folds `value` across all hosts, in host-rank order for non-commutative
/// `op`, and returns the same result to every host. Uses the hypercube
/// recursive-doubling exchange from `NetGroup::AllReduce` when `size` is a
/// power of two; otherwise falls back to reduce-to-root-then-broadcast.
pub fn all_reduce<T, Op>(group: &Group, value: T, op: &Op) -> Result<T>
where
    T: Serialization + Clone,
    Op: Fn(&T, &T) -> T,
{
    let size = group.size();
    if size == 1 {
        return Ok(value);
    }

    if size.is_power_of_two() {
        let rank = group.my_rank();
        let mut value = value;
        let mut d = 1usize;
        while d < size {
            let peer = rank ^ d;
            if peer < size {
                group.send_bytes(peer, &to_bytes(&value))?;
                let received: T = from_bytes(&group.recv_bytes(peer)?)?;
                value = op(&value, &received);
            }
            d <<= 1;
        }
        Ok(value)
    } else {
        let folded = reduce_to_root(group, value, op, 0)?;
        broadcast(group, folded, 0)
    }
}

/// Pointer-doubling parallel prefix sum. `inclusive = true` includes each
/// host's own value in its result; `inclusive = false` excludes it (rank 0
/// then gets `T::default()`).
pub fn prefix_sum<T, Op>(group: &Group, value: T, op: &Op, inclusive: bool) -> Result<T>
where
    T: Serialization + Clone + Default,
    Op: Fn(&T, &T) -> T,
{
    let size = group.size();
    let rank = group.my_rank();

    let mut exclusive_acc: Option<T> = None;
    let mut forward = value.clone();
    let mut d = 1usize;
    while d < size {
        if rank + d < size {
            group.send_bytes(rank + d, &to_bytes(&forward))?;
        }
        if rank >= d {
            let received: T = from_bytes(&group.recv_bytes(rank - d)?)?;
            exclusive_acc = Some(match exclusive_acc {
                Some(acc) => op(&acc, &received),
                None => received.clone(),
            });
            forward = op(&forward, &received);
        }
        d <<= 1;
    }

    if inclusive {
        Ok(match &exclusive_acc {
            Some(acc) => op(acc, &value),
            None => value,
        })
    } else {
        Ok(exclusive_acc.unwrap_or_default())
    }
}

/// Barrier implemented as an AllReduce on a counter, per spec §4.4.
pub fn barrier(group: &Group) -> Result<()> {
    all_reduce(group, 1u64, &|a: &u64, b: &u64| a + b)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_delivers_roots_value_to_everyone() {
        let results = Group::execute_local_mock(5, |group| {
            let value = if group.my_rank() == 2 { 42u32 } else { 0 };
            broadcast(&group, value, 2).unwrap()
        });
        assert_eq!(results, vec![42; 5]);
    }

    #[test]
    fn all_reduce_sums_across_power_of_two_hosts() {
        let results = Group::execute_local_mock(4, |group| {
            all_reduce(&group, (group.my_rank() + 1) as u32, &|a: &u32, b: &u32| a + b).unwrap()
        });
        assert_eq!(results, vec![10; 4]); // 1+2+3+4
    }

    #[test]
    fn all_reduce_sums_across_non_power_of_two_hosts() {
        let results = Group::execute_local_mock(3, |group| {
            all_reduce(&group, (group.my_rank() + 1) as u32, &|a: &u32, b: &u32| a + b).unwrap()
        });
        assert_eq!(results, vec![6; 3]); // 1+2+3
    }

    #[test]
    fn inclusive_prefix_sum_matches_running_total() {
        let results = Group::execute_local_mock(4, |group| {
            prefix_sum(&group, (group.my_rank() + 1) as u32, &|a: &u32, b: &u32| a + b, true).unwrap()
        });
        assert_eq!(results, vec![1, 3, 6, 10]);
    }

    #[test]
    fn exclusive_prefix_sum_excludes_own_value() {
        let results = Group::execute_local_mock(4, |group| {
            prefix_sum(&group, (group.my_rank() + 1) as u32, &|a: &u32, b: &u32| a + b, false).unwrap()
        });
        assert_eq!(results, vec![0, 1, 3, 6]);
    }

    #[test]
    fn barrier_returns_on_every_host() {
        let results = Group::execute_local_mock(6, |group| {
            barrier(&group).unwrap();
            group.my_rank()
        });
        assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
    }
}
