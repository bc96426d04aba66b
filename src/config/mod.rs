//! Configuration module for e2snap
//!
//! CLI arguments, runtime settings and the remote progress
//! configuration file.

pub mod remote;
mod settings;

pub use remote::{RemoteSettings, StompSettings, DEFAULT_CONFIG_PATH};
pub use settings::*;
