// Reduce phase (C8): pre-phase local aggregation, post-phase insert-or-
// reduce with spill-to-File and iterative re-reduction, the probing and
// bucket table flavors both phases share, and the ReduceToIndex variant.

mod bucket;
mod post_phase;
mod pre_phase;
mod probing;
mod reduce_to_index;
mod table;

pub use bucket::BucketTable;
pub use post_phase::{PostPhase, MAX_REDUCE_ITERATIONS};
pub use pre_phase::PrePhase;
pub use probing::ProbingTable;
pub use reduce_to_index::{bucket_for_index, worker_for_index, ReduceToIndexPhase};
pub use table::{hash_with_salt, partition_of, scaled_index, ReduceConfig};
