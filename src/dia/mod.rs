// DIA execution engine (C7): the lazily-materialized dataflow graph, its
// per-item function stack, and the StageBuilder that drives
// Execute/PushData across a DAG of nodes.

mod handle;
mod node;
mod stage;

pub use handle::{FunctionStack, DIA};
pub use node::{DiaNode, NodeState, NodeType, Operator};
pub use stage::StageBuilder;
