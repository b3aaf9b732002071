// StageBuilder (C7): collects the not-yet-executed ancestors of an action
// node, orders them parent-before-child, and drives each through its
// Execute/RunPushData/Dispose lifecycle. Grounded on `thrill/api/context.cpp`
// and `thrill/api/dia_base.cpp`'s `RunScope`: a BFS walk over `parents()`
// collecting every node still `NEW`, followed by processing stages in
// reverse-discovery (root-first) order.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::dia::node::{DiaNode, NodeState};
use crate::Result;

pub struct StageBuilder;

impl StageBuilder {
    /// Runs every `NEW` ancestor of `action` (inclusive) through
    /// Execute -> RunPushData -> (dispose if consumed), then runs `action`
    /// itself the same way. Nodes already `EXECUTED` are pushed again
    /// without a fresh `Execute()`, matching spec §4.6's "For EXECUTED
    /// nodes, skip straight to RunPushData so a `.Keep()`'d DIA can be
    /// reused downstream without recomputation."
    pub fn run(action: &Arc<DiaNode>) -> Result<()> {
        let stages = Self::collect_stages(action);
        for node in &stages {
            if node.state() == NodeState::New {
                node.execute()?;
            }
            node.run_push_data(node.consume_on_push)?;
            // Children only ever need one push per stage run; observers
            // registered purely to drive this pass are no longer needed
            // once it has replayed its data downstream.
            node.detach_children();
        }
        Ok(())
    }

    /// BFS from `action` through `parents`, collecting every node not yet
    /// `Disposed`, then reverses the walk so parents precede children.
    fn collect_stages(action: &Arc<DiaNode>) -> Vec<Arc<DiaNode>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(Arc::clone(action));
        seen.insert(action.id);

        while let Some(node) = queue.pop_front() {
            if node.state() != NodeState::Disposed {
                order.push(Arc::clone(&node));
            }
            for parent in &node.parents {
                if seen.insert(parent.id) {
                    queue.push_back(Arc::clone(parent));
                }
            }
        }

        order.reverse();
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockPool, File};
    use crate::dia::node::{NodeType, Operator};
    use crate::mem::Manager;
    use std::sync::Mutex;

    fn pool() -> Arc<BlockPool> {
        BlockPool::new(1 << 20, 1 << 21, Arc::new(Manager::new(1 << 20, 1 << 21)))
    }

    struct RecordingOperator {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Operator for RecordingOperator {
        fn execute(&self, _scratch: &Arc<File>) -> Result<()> {
            self.log.lock().unwrap().push(self.label);
            Ok(())
        }
        fn push_data(&self, _scratch: &Arc<File>, _consume: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn executes_parents_before_children_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = pool();
        let root = DiaNode::new(
            "root",
            NodeType::Source,
            Vec::new(),
            false,
            Arc::clone(&pool),
            Box::new(RecordingOperator {
                label: "root",
                log: Arc::clone(&log),
            }),
        );
        let mid = DiaNode::new(
            "mid",
            NodeType::Collapse,
            vec![Arc::clone(&root)],
            true,
            Arc::clone(&pool),
            Box::new(RecordingOperator {
                label: "mid",
                log: Arc::clone(&log),
            }),
        );
        let action = DiaNode::new(
            "action",
            NodeType::Action,
            vec![Arc::clone(&mid)],
            true,
            pool,
            Box::new(RecordingOperator {
                label: "action",
                log: Arc::clone(&log),
            }),
        );

        StageBuilder::run(&action).unwrap();

        let order = log.lock().unwrap().clone();
        assert_eq!(order, vec!["root", "mid", "action"]);
        assert_eq!(root.state(), NodeState::Disposed);
        assert_eq!(mid.state(), NodeState::Disposed);
        assert_eq!(action.state(), NodeState::Disposed);
    }

    #[test]
    fn already_executed_node_is_not_re_executed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pool = pool();
        let root = DiaNode::new(
            "root",
            NodeType::Source,
            Vec::new(),
            false,
            pool,
            Box::new(RecordingOperator {
                label: "root",
                log: Arc::clone(&log),
            }),
        );
        root.execute().unwrap();
        assert_eq!(root.state(), NodeState::Executed);
        log.lock().unwrap().clear();

        StageBuilder::run(&root).unwrap();
        // `execute()` must not run a second time for an already-Executed node.
        assert!(log.lock().unwrap().is_empty());
    }
}
