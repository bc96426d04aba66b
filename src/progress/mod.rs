//! Progress reporting module
//!
//! ETA estimation from flush events, the local progress bar and the
//! optional remote progress channel.

pub mod estimator;
pub mod publish;
mod reporter;
mod sink;

pub use estimator::{EtaEstimator, EtaModel, EtaSnapshot, ProgressState};
pub use publish::{format_remote_status, BackgroundPublisher, NoopPublisher, Publisher};
pub use reporter::*;
pub use sink::ProgressSink;
