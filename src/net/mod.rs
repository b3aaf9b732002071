// Host-to-host transport and collectives (C5).

mod collective;
mod flow_control;
mod group;

pub use collective::{all_reduce, barrier, broadcast, prefix_sum, reduce_to_root};
pub use flow_control::FlowControlChannel;
pub use group::{Connection, Group};
