//! Stream bookkeeping: the server-side record of a client stream
//! (`RStream`) and its per-device binding (`DevStream`).

pub mod dev_stream;
pub mod rstream;

pub use dev_stream::DevStream;
pub use rstream::{Direction, RStream, RStreamId, StreamFlags};
