// DIA node (C7): a vertex in the lazily-materialized dataflow graph.
// Grounded on `thrill/api/dia_base.hpp`/`dia_base.cpp`: NEW/EXECUTED/
// DISPOSED lifecycle, SOURCE/DOP/COLLAPSE/ACTION/CACHE type tags, strong
// parent references with only observer (Weak) child references.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::block::File;
use crate::block::BlockPool;
use crate::error::ThrillError;
use crate::Result;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Source,
    /// Distributed operation: crosses a shuffle boundary (ReduceByKey, Sort, ...).
    Dop,
    /// Element-wise fusion point: installs the handle's function stack as
    /// the parent's push sink instead of creating fresh scratch.
    Collapse,
    Action,
    Cache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    New,
    Executed,
    Disposed,
}

/// The operator-specific behavior a concrete DIA node plugs in. Grounded on
/// `DIABase`'s virtual `Execute`/`PushData`/`Dispose` trio; `spec.md` §4.6
/// explicitly calls these a "small closed set of node-type tags ... with
/// virtual Execute/PushData hooks" rather than a deep class hierarchy.
pub trait Operator: Send + Sync {
    /// Runs pre-collective work (shuffling, sorting) into the node's
    /// scratch File. Called exactly once, on the `NEW` -> `EXECUTED`
    /// transition.
    fn execute(&self, scratch: &Arc<File>) -> Result<()>;

    /// Replays this node's results to every registered child. `consume`
    /// mirrors the node's `consume_on_push_data` flag: when true, the
    /// scratch storage is drained in lockstep with the push instead of kept
    /// for a later `.Keep()`'d re-read.
    fn push_data(&self, scratch: &Arc<File>, consume: bool) -> Result<()>;
}

struct NodeInner {
    state: NodeState,
    children: Vec<Weak<DiaNode>>,
}

/// A vertex in the DAG. Parents are owned (`Arc`) so the arena stays alive
/// as long as any downstream node references it; children are `Weak` so a
/// stage can detach and drop them once fully pushed, per spec §4.6 step 4.
pub struct DiaNode {
    pub id: u64,
    pub label: &'static str,
    pub node_type: NodeType,
    pub parents: Vec<Arc<DiaNode>>,
    pub consume_on_push: bool,
    pub scratch: Arc<File>,
    operator: Box<dyn Operator>,
    inner: Mutex<NodeInner>,
}

impl DiaNode {
    pub fn new(
        label: &'static str,
        node_type: NodeType,
        parents: Vec<Arc<DiaNode>>,
        consume_on_push: bool,
        pool: Arc<BlockPool>,
        operator: Box<dyn Operator>,
    ) -> Arc<Self> {
        let node = Arc::new(DiaNode {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::SeqCst),
            label,
            node_type,
            parents: parents.clone(),
            consume_on_push,
            scratch: File::new(pool),
            operator,
            inner: Mutex::new(NodeInner {
                state: NodeState::New,
                children: Vec::new(),
            }),
        });
        for parent in &parents {
            parent.register_child(&node);
        }
        node
    }

    pub fn state(&self) -> NodeState {
        self.inner.lock().unwrap().state
    }

    fn register_child(&self, child: &Arc<DiaNode>) {
        self.inner.lock().unwrap().children.push(Arc::downgrade(child));
    }

    pub fn children(&self) -> Vec<Arc<DiaNode>> {
        self.inner
            .lock()
            .unwrap()
            .children
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Detaches every child observer reference. Called once a stage has
    /// finished pushing this node's data, per spec §4.6 step 4: "After a
    /// stage completes, detach it from its children; its scratch may be
    /// reclaimed."
    pub fn detach_children(&self) {
        self.inner.lock().unwrap().children.clear();
    }

    pub fn execute(&self) -> Result<()> {
        self.operator.execute(&self.scratch)?;
        self.inner.lock().unwrap().state = NodeState::Executed;
        Ok(())
    }

    /// `consume = true` drains scratch in lockstep with the push; it is a
    /// fatal error to call this a second time on a node that was consumed
    /// without an intervening `.Keep()`, matching spec §4.6's "fatal error
    /// to push-data a node that was consumed unless the user called
    /// `.Keep()`".
    pub fn run_push_data(&self, consume: bool) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state == NodeState::Disposed {
                return Err(ThrillError::InvalidState(format!(
                    "node {} ({}) already disposed",
                    self.id, self.label
                )));
            }
        }
        self.operator.push_data(&self.scratch, consume)?;
        if consume {
            self.dispose();
        }
        Ok(())
    }

    pub fn dispose(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = NodeState::Disposed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Manager;

    fn pool() -> Arc<BlockPool> {
        BlockPool::new(1 << 20, 1 << 21, Arc::new(Manager::new(1 << 20, 1 << 21)))
    }

    struct NoopOperator;

    impl Operator for NoopOperator {
        fn execute(&self, _scratch: &Arc<File>) -> Result<()> {
            Ok(())
        }
        fn push_data(&self, _scratch: &Arc<File>, _consume: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lifecycle_moves_new_to_executed_to_disposed() {
        let node = DiaNode::new("Root", NodeType::Source, Vec::new(), false, pool(), Box::new(NoopOperator));
        assert_eq!(node.state(), NodeState::New);
        node.execute().unwrap();
        assert_eq!(node.state(), NodeState::Executed);
        node.run_push_data(true).unwrap();
        assert_eq!(node.state(), NodeState::Disposed);
    }

    #[test]
    fn push_data_after_dispose_is_an_error() {
        let node = DiaNode::new("Root", NodeType::Source, Vec::new(), false, pool(), Box::new(NoopOperator));
        node.execute().unwrap();
        node.run_push_data(true).unwrap();
        assert!(node.run_push_data(false).is_err());
    }

    #[test]
    fn parents_hold_strong_refs_children_are_weak_and_detachable() {
        let parent = DiaNode::new("Parent", NodeType::Source, Vec::new(), false, pool(), Box::new(NoopOperator));
        let child = DiaNode::new(
            "Child",
            NodeType::Collapse,
            vec![Arc::clone(&parent)],
            false,
            pool(),
            Box::new(NoopOperator),
        );
        assert_eq!(parent.children().len(), 1);
        assert_eq!(parent.children()[0].id, child.id);
        assert_eq!(child.parents.len(), 1);

        parent.detach_children();
        assert_eq!(parent.children().len(), 0);
        // Detaching children does not drop the child itself; the caller
        // still holds `child` directly, and `child.parents` keeps the
        // parent alive regardless.
        assert_eq!(child.parents[0].id, parent.id);
    }
}
