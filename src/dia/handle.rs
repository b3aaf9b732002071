// DIA handle (C7): a user-facing value carrying `(node_ref,
// chained_local_function_stack)`. Grounded on `thrill/api/dia.hpp`'s `DIA<T,
// Stack>` and `thrill/common/function_stack.hpp`'s emitter-chain
// composition, which is why map/filter/flat_map all fold onto the same
// `FunctionStack` shape instead of needing three different node types.
//
// Simplification from the original: nodes here replay by having each
// child's `Execute()` pull straight from its parent's scratch File rather
// than the parent invoking a registered push callback on the child. This
// keeps `DiaNode` non-generic (it never needs to know a child's item type)
// at the cost of one extra scratch materialization per DOP boundary that
// the original's inline push avoids. `.Collapse()` still fuses an entire
// chain of map/filter/flat_map into a single extra node, so pipeline fusion
// of element-wise operators is preserved; only DOP-to-DOP chains pay the
// extra materialization. Recorded in DESIGN.md.

use std::sync::{Arc, Mutex};

use crate::block::serialization::Serialization;
use crate::block::{BlockPool, File};
use crate::dia::node::{DiaNode, NodeType, Operator};
use crate::Result;

const DIA_BLOCK_SIZE: usize = 256 * 1024;

type StackFn<T> = Arc<dyn Fn(T, &mut dyn FnMut(T)) + Send + Sync>;

/// A composable chain of per-item callbacks. Each stage receives the
/// previous stage's output and an `emit` continuation; map calls `emit`
/// once, filter zero-or-one times, flat_map any number of times. This is
/// the uniform shape `thrill/common/function_stack.hpp`'s `Compose` gives
/// all three operators.
pub struct FunctionStack<T> {
    fns: Vec<StackFn<T>>,
}

impl<T> Clone for FunctionStack<T> {
    fn clone(&self) -> Self {
        FunctionStack {
            fns: self.fns.clone(),
        }
    }
}

impl<T: 'static> FunctionStack<T> {
    pub fn identity() -> Self {
        FunctionStack { fns: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.fns.is_empty()
    }

    fn pushed(&self, f: StackFn<T>) -> Self {
        let mut fns = self.fns.clone();
        fns.push(f);
        FunctionStack { fns }
    }

    /// Runs `item` through every stage in order, calling `sink` once per
    /// item the last stage emits.
    pub fn run(&self, item: T, sink: &mut dyn FnMut(T)) {
        Self::run_from(&self.fns, 0, item, sink);
    }

    fn run_from(fns: &[StackFn<T>], idx: usize, item: T, sink: &mut dyn FnMut(T)) {
        if idx == fns.len() {
            sink(item);
            return;
        }
        (fns[idx])(item, &mut |out| Self::run_from(fns, idx + 1, out, sink));
    }
}

/// User-facing handle: a reference to the node this DIA is materialized
/// from (or will collapse into), plus a not-yet-fused chain of per-item
/// callbacks.
pub struct DIA<T> {
    node: Arc<DiaNode>,
    stack: FunctionStack<T>,
}

impl<T> Clone for DIA<T> {
    fn clone(&self) -> Self {
        DIA {
            node: Arc::clone(&self.node),
            stack: self.stack.clone(),
        }
    }
}

impl<T: Serialization + Clone + Send + Sync + 'static> DIA<T> {
    pub fn from_node(node: Arc<DiaNode>) -> Self {
        DIA {
            node,
            stack: FunctionStack::identity(),
        }
    }

    /// Builds a SOURCE node that replays `items` verbatim. The items are
    /// written to the node's scratch File eagerly at construction time
    /// (Source's `Execute` is therefore a no-op), matching a SOURCE node's
    /// role as the DAG's leaves.
    pub fn from_vec(pool: Arc<BlockPool>, items: Vec<T>) -> Result<Self> {
        let node = DiaNode::new("Source", NodeType::Source, Vec::new(), false, pool, Box::new(SourceOperator));
        {
            let mut writer = node.scratch.get_writer(DIA_BLOCK_SIZE);
            for item in &items {
                writer.put(item)?;
            }
            writer.close()?;
        }
        Ok(DIA {
            node,
            stack: FunctionStack::identity(),
        })
    }

    pub fn node(&self) -> &Arc<DiaNode> {
        &self.node
    }

    pub fn map<F>(&self, f: F) -> DIA<T>
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let stack = self
            .stack
            .pushed(Arc::new(move |item, emit: &mut dyn FnMut(T)| emit(f(item))));
        DIA {
            node: Arc::clone(&self.node),
            stack,
        }
    }

    pub fn filter<F>(&self, f: F) -> DIA<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let stack = self.stack.pushed(Arc::new(move |item: T, emit: &mut dyn FnMut(T)| {
            if f(&item) {
                emit(item);
            }
        }));
        DIA {
            node: Arc::clone(&self.node),
            stack,
        }
    }

    pub fn flat_map<F>(&self, f: F) -> DIA<T>
    where
        F: Fn(T) -> Vec<T> + Send + Sync + 'static,
    {
        let stack = self.stack.pushed(Arc::new(move |item: T, emit: &mut dyn FnMut(T)| {
            for out in f(item) {
                emit(out);
            }
        }));
        DIA {
            node: Arc::clone(&self.node),
            stack,
        }
    }

    /// Freezes the chained function stack into a fresh Collapse node.
    /// No-op (returns a handle on the same node) if nothing is queued, so
    /// calling `.collapse()` defensively before a DOP boundary never adds
    /// a redundant node.
    pub fn collapse(&self, pool: Arc<BlockPool>) -> DIA<T> {
        if self.stack.is_empty() {
            return DIA {
                node: Arc::clone(&self.node),
                stack: FunctionStack::identity(),
            };
        }
        let operator = CollapseOperator {
            parent: Arc::clone(&self.node),
            stack: self.stack.clone(),
        };
        let node = DiaNode::new(
            "Collapse",
            NodeType::Collapse,
            vec![Arc::clone(&self.node)],
            true,
            pool,
            Box::new(operator),
        );
        DIA {
            node,
            stack: FunctionStack::identity(),
        }
    }

    /// Materializes the DIA's items (forcing a `.collapse()` first if a
    /// chain is pending) and runs the StageBuilder, returning every item in
    /// this worker's local partition. This is the "AllGather"-shaped action
    /// named in spec.md's worked examples.
    pub fn all_gather(&self, pool: Arc<BlockPool>) -> Result<Vec<T>> {
        let collapsed = self.collapse(Arc::clone(&pool));
        let result = Arc::new(Mutex::new(Vec::new()));
        let action = DiaNode::new(
            "AllGatherAction",
            NodeType::Action,
            vec![Arc::clone(&collapsed.node)],
            false,
            pool,
            Box::new(GatherOperator::<T> {
                parent: Arc::clone(&collapsed.node),
                result: Arc::clone(&result),
            }),
        );
        crate::dia::stage::StageBuilder::run(&action)?;
        Ok(Arc::try_unwrap(result)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|arc| arc.lock().unwrap().clone()))
    }
}

struct SourceOperator;

impl Operator for SourceOperator {
    fn execute(&self, _scratch: &Arc<File>) -> Result<()> {
        Ok(())
    }
    fn push_data(&self, _scratch: &Arc<File>, _consume: bool) -> Result<()> {
        Ok(())
    }
}

struct CollapseOperator<T> {
    parent: Arc<DiaNode>,
    stack: FunctionStack<T>,
}

impl<T: Serialization + Clone + Send + Sync + 'static> Operator for CollapseOperator<T> {
    fn execute(&self, scratch: &Arc<File>) -> Result<()> {
        let mut reader = self.parent.scratch.get_keep_reader();
        let mut writer = scratch.get_writer(DIA_BLOCK_SIZE);
        while reader.has_next() {
            let item = reader.next::<T>()?;
            let mut put_err = None;
            self.stack.run(item, &mut |out| {
                if let Err(e) = writer.put(&out) {
                    put_err = Some(e);
                }
            });
            if let Some(e) = put_err {
                return Err(e);
            }
        }
        writer.close()?;
        Ok(())
    }

    fn push_data(&self, _scratch: &Arc<File>, _consume: bool) -> Result<()> {
        Ok(())
    }
}

struct GatherOperator<T> {
    parent: Arc<DiaNode>,
    result: Arc<Mutex<Vec<T>>>,
}

impl<T: Serialization + Clone + Send + Sync + 'static> Operator for GatherOperator<T> {
    fn execute(&self, _scratch: &Arc<File>) -> Result<()> {
        let mut reader = self.parent.scratch.get_keep_reader();
        let mut out = Vec::new();
        while reader.has_next() {
            out.push(reader.next::<T>()?);
        }
        *self.result.lock().unwrap() = out;
        Ok(())
    }

    fn push_data(&self, _scratch: &Arc<File>, _consume: bool) -> Result<()> {
        Ok(())
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
    fn map_filter_collapse_to_a_single_fused_node() {
        let pool = pool();
        let dia = DIA::from_vec(Arc::clone(&pool), vec![1i32, 2, 3, 4, 5, 6]).unwrap();
        let chained = dia.map(|x| x * 2).filter(|x| *x > 4);
        let result = chained.all_gather(pool).unwrap();
        assert_eq!(result, vec![6, 8, 10, 12]);
    }

    #[test]
    fn flat_map_expands_items() {
        let pool = pool();
        let dia = DIA::from_vec(Arc::clone(&pool), vec![2i32, 3]).unwrap();
        let chained = dia.flat_map(|x| vec![x, x]);
        let result = chained.all_gather(pool).unwrap();
        assert_eq!(result, vec![2, 2, 3, 3]);
    }
}
