//! Network module
//!
//! Transport for the remote progress channel.

pub mod stomp;

pub use stomp::{StompClient, Frame, encode_frame, decode_frame};
