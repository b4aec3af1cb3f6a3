//! Frame-level I/O over the two halves of a transport stream.
//!
//! The read half belongs to the dispatcher task and the write half sits
//! behind the session's writer lock, so each side owns its own buffer.

mod reader;
mod writer;

pub use reader::FrameReader;
pub use writer::FrameWriter;
