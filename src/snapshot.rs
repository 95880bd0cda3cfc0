//! The immutable binary snapshot: on-disk format, byte-level scanner,
//! memory-mapped reader, and atomic writer.
//!
//! ## Module structure
//!
//! - `format` - on-disk header/record layout and the raw record view
//! - `scan` - stateless byte-level match and comparator primitives
//! - `reader` - `BinaryIndex`, the memory-mapped snapshot reader
//! - `writer` - serializes an item set to the snapshot format atomically

mod format;
mod reader;
mod scan;
mod writer;

pub use format::{RecordFlags, RecordView, FORMAT_VERSION, HEADER_BYTES, MAGIC, RECORD_STRIDE};
pub use reader::BinaryIndex;
pub use writer::write_snapshot;
