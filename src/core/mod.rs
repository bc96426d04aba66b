//! Core snapshot module
//!
//! Turns a validated layout into a copy plan and streams that plan from
//! the source into the output sink.

pub mod copier;
pub mod engine;
pub mod plan;

pub use copier::{CopyStats, FlushObserver, StreamingCopier, ChunkBuffer, DEFAULT_BUFFER_LIMIT};
pub use engine::{connect_remote, run_snapshot, SnapshotEngine, SnapshotResult};
pub use plan::{CopyOperation, CopyPlan, PlanGenerator};
