// Stream multiplexer (C6): StreamId allocation, per-(stream, to, from)
// inbound queues, loopback vs. cross-host routing, and the CatStream/
// MixStream/Scatter surface built on top of it.

mod cat_stream;
mod header;
mod mix_stream;
mod multiplexer;
mod scatter;

pub use cat_stream::{CatStream, ConcatSource};
pub use header::{decode_frame, encode_frame, WireHeader, STREAM_MAGIC};
pub use mix_stream::{MixReader, MixStream};
pub use multiplexer::{Multiplexer, QueueSource, StreamData, StreamDataSnapshot, StreamSink};
pub use scatter::scatter;
