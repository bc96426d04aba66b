//! Filesystem layout module
//!
//! Turns metadata listings into a validated block-range model of the
//! source filesystem.

pub mod model;
pub mod parser;
pub mod source;

pub use model::{BlockRange, Group, RangeModel};
pub use parser::{normalize_label, parse_layout, LayoutParser};
pub use source::{LayoutSource, DEFAULT_METADATA_TOOL};
