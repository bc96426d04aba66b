//! # e2snap - Sparse Snapshots of ext2/ext3 Filesystems
//!
//! e2snap copies an ext2/ext3 block device or image by reading only the
//! blocks the filesystem uses and writing zeros in place of free ones.
//! The result has the same logical size as the source, so it can be
//! written back or loop-mounted unchanged, and compresses far better than
//! a raw device copy.
//!
//! ## Features
//!
//! - **Layout-aware copy**: free-block lists come from `dumpe2fs` output
//! - **Bounded memory**: transfers are chunked to a fixed buffer limit
//! - **Compressed output**: gzip, LZ4 or zstd, picked by file extension
//! - **Live ETA**: a-priori estimate blended with observed throughput
//! - **Remote progress**: optional STOMP channel for monitoring systems
//!
//! ## Quick Start
//!
//! ```no_run
//! use e2snap::config::SnapshotConfig;
//! use e2snap::core::SnapshotEngine;
//! use e2snap::layout::LayoutSource;
//! use std::path::PathBuf;
//!
//! let config = SnapshotConfig {
//!     source: PathBuf::from("/dev/sdb1"),
//!     destination: "/backup/sdb1.img.gz".to_string(),
//!     layout: LayoutSource::dumpe2fs("/dev/sdb1"),
//!     ..Default::default()
//! };
//!
//! let result = SnapshotEngine::new(config).execute().unwrap();
//! result.print_summary();
//! ```
//!
//! ## Planning Only
//!
//! ```no_run
//! use e2snap::core::PlanGenerator;
//! use e2snap::layout::parse_layout;
//!
//! let listing = std::fs::read_to_string("dumpe2fs.txt").unwrap();
//! let model = parse_layout(listing.lines()).unwrap();
//! let plan = PlanGenerator::new().generate(&model);
//!
//! for op in &plan.operations {
//!     println!("{} {}", op.label(), op.range());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod layout;
pub mod network;
pub mod progress;

// Re-export commonly used types
pub use config::SnapshotConfig;
pub use core::{SnapshotEngine, SnapshotResult};
pub use error::{Result, SnapError};
pub use progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use e2snap::prelude::*;
    //! ```

    pub use crate::config::{RemoteSettings, SnapshotConfig};
    pub use crate::core::{CopyOperation, CopyPlan, PlanGenerator, SnapshotEngine, SnapshotResult, StreamingCopier};
    pub use crate::error::{Result, SnapError};
    pub use crate::fs::{OutputSink, SinkKind};
    pub use crate::layout::{parse_layout, LayoutSource, RangeModel};
    pub use crate::progress::{EtaEstimator, ProgressReporter, ProgressSink};
}
