// Thrill: a distributed in-memory batch data-processing framework. The
// crate root wires together the block data plane (C1-C4), host-to-host
// transport and collectives (C5), the stream multiplexer (C6), the DIA
// execution engine (C7), the reduce phase (C8), tracked memory accounting
// (C9), and external-memory I/O (C10).

pub mod block;
pub mod dia;
mod error;
pub mod host;
pub mod io;
pub mod mem;
pub mod net;
pub mod reduce;
pub mod stream;

pub use error::{Result, ThrillError};
pub use host::{HostConfig, HostContext};
