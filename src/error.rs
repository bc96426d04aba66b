//! Error types for e2snap
//!
//! Every failure the snapshot pipeline can hit is a variant of
//! [`SnapError`]. Most kinds are fatal and end the run with a non-zero
//! exit; configuration and publish failures only disable the remote
//! progress channel.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for e2snap operations
#[derive(Error, Debug)]
pub enum SnapError {
    /// Command-line arguments that cannot be turned into a run
    #[error("Invalid arguments: {0}")]
    Usage(String),

    /// Remote-channel configuration missing, unparseable or unreachable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source device or image cannot be opened or read
    #[error("Cannot open input '{path}': {source}")]
    InputAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem metadata tool could not be executed
    #[error("Cannot run metadata tool '{program}': {message}")]
    MetadataTool { program: String, message: String },

    /// Destination already exists and would be overwritten
    #[error("Refusing to overwrite {kind} '{path}'")]
    OutputConflict { path: PathBuf, kind: &'static str },

    /// Filesystem metadata is malformed
    #[error("Layout parse error at line {line}: {message}")]
    LayoutParse { line: usize, message: String },

    /// Parsed layout is internally inconsistent (overlaps, gaps, out-of-range free blocks)
    #[error("Invalid filesystem layout: {0}")]
    LayoutInvalid(String),

    /// Read or write failure in the middle of the copy
    #[error("Stream I/O error while {context}: {source}")]
    StreamIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote publish failed at runtime
    #[error("Publish error: {0}")]
    Publish(String),

    /// I/O error with path context
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SnapError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a layout parse error for a 1-based input line
    pub fn layout(line: usize, message: impl Into<String>) -> Self {
        Self::LayoutParse {
            line,
            message: message.into(),
        }
    }

    /// Create a layout consistency error
    pub fn invalid_layout(message: impl Into<String>) -> Self {
        Self::LayoutInvalid(message.into())
    }

    /// Create a mid-copy stream error
    pub fn stream(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::StreamIo {
            context: context.into(),
            source,
        }
    }

    /// Whether this error must abort the run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Publish(_))
    }
}

/// Result type alias for e2snap operations
pub type Result<T> = std::result::Result<T, SnapError>;

impl From<serde_json::Error> for SnapError {
    fn from(err: serde_json::Error) -> Self {
        SnapError::Config(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Tag an I/O error as a mid-copy stream failure
    fn in_stream(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| SnapError::io(path, e))
    }

    fn in_stream(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| SnapError::stream(context(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SnapError::io("/dev/sdz1", io_err);
        assert!(err.to_string().contains("/dev/sdz1"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fatality() {
        assert!(!SnapError::config("no stomp section").is_fatal());
        assert!(!SnapError::Publish("broken pipe".into()).is_fatal());
        assert!(SnapError::layout(3, "bad block count").is_fatal());
        assert!(SnapError::OutputConflict {
            path: PathBuf::from("/tmp/out.gz"),
            kind: "file",
        }
        .is_fatal());
    }

    #[test]
    fn test_usage_errors_are_fatal() {
        let err = SnapError::Usage("Buffer size must be positive".into());
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Invalid arguments: Buffer size must be positive");
    }

    #[test]
    fn test_in_stream_context() {
        let res: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read"));
        let err = res.in_stream(|| "reading block 7".to_string()).unwrap_err();
        assert!(err.to_string().contains("reading block 7"));
        assert!(matches!(err, SnapError::StreamIo { .. }));
    }

    #[test]
    fn test_layout_message() {
        let err = SnapError::layout(12, "group 3 ends before it starts");
        assert_eq!(
            err.to_string(),
            "Layout parse error at line 12: group 3 ends before it starts"
        );
    }
}
