//! File system access module
//!
//! Opening the live source, destination pre-flight checks and the
//! sequential output sinks.

pub mod input;
pub mod sink;

pub use input::{check_destination, is_block_device, open_source};
pub use sink::{CountingWriter, OutputSink, SinkKind, SinkStats};
