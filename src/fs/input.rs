//! Source access and destination pre-flight checks

use crate::error::{Result, SnapError};
use std::fs::{File, Metadata};
use std::io;
use std::path::Path;
use tracing::warn;

#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;

/// Whether metadata describes a block device
#[cfg(unix)]
pub fn is_block_device(metadata: &Metadata) -> bool {
    metadata.file_type().is_block_device()
}

/// Whether metadata describes a block device (never on non-Unix)
#[cfg(not(unix))]
pub fn is_block_device(_metadata: &Metadata) -> bool {
    false
}

/// Open the live source for reading
///
/// Image files are accepted with a warning.
pub fn open_source(path: &Path) -> Result<File> {
    let input_error = |source: io::Error| SnapError::InputAccess {
        path: path.to_path_buf(),
        source,
    };

    let metadata = std::fs::metadata(path).map_err(input_error)?;
    if !is_block_device(&metadata) {
        warn!("Input file {} is not a block device", path.display());
    }
    File::open(path).map_err(input_error)
}

/// Refuse to write over an existing block device or file
pub fn check_destination(destination: &str) -> Result<()> {
    if destination == "-" {
        return Ok(());
    }

    let path = Path::new(destination);
    match std::fs::metadata(path) {
        Ok(metadata) => Err(SnapError::OutputConflict {
            path: path.to_path_buf(),
            kind: if is_block_device(&metadata) { "block device" } else { "file" },
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SnapError::io(path, e)),
    }
}
