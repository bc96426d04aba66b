//! Where filesystem metadata listings come from
//!
//! Normally the listing is produced by running `dumpe2fs` on the source
//! device. A previously captured listing can be read from a file instead,
//! which is also how the parser is exercised in tests.

use crate::error::{IoResultExt, Result, SnapError};
use crate::layout::model::RangeModel;
use crate::layout::parser::parse_layout;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Default metadata tool
pub const DEFAULT_METADATA_TOOL: &str = "dumpe2fs";

/// Origin of a metadata listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutSource {
    /// Run `program <device>` and read its standard output
    Tool {
        /// Program to execute
        program: String,
        /// Device or image passed as the only argument
        device: PathBuf,
    },
    /// Read a captured listing from disk
    File(PathBuf),
}

impl LayoutSource {
    /// Run the default metadata tool against `device`
    pub fn dumpe2fs(device: impl Into<PathBuf>) -> Self {
        Self::Tool {
            program: DEFAULT_METADATA_TOOL.to_string(),
            device: device.into(),
        }
    }

    /// Collect the listing as text
    ///
    /// Labels such as the volume name are printed as raw bytes, so
    /// invalid UTF-8 is replaced rather than rejected.
    pub fn read_listing(&self) -> Result<String> {
        let raw = match self {
            Self::Tool { program, device } => run_tool(program, device)?,
            Self::File(path) => {
                debug!("Reading captured layout from {:?}", path);
                std::fs::read(path).with_path(path)?
            }
        };
        Ok(decode_listing(raw))
    }

    /// Collect and parse the listing
    pub fn load(&self) -> Result<RangeModel> {
        let listing = self.read_listing()?;
        parse_layout(listing.lines())
    }
}

fn decode_listing(raw: Vec<u8>) -> String {
    match String::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            debug!("Listing is not valid UTF-8 at byte {}", e.utf8_error().valid_up_to());
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}

fn run_tool(program: &str, device: &Path) -> Result<Vec<u8>> {
    info!("Running {} {:?}", program, device);

    let output = Command::new(program)
        .arg(device)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SnapError::MetadataTool {
            program: program.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SnapError::MetadataTool {
            program: program.to_string(),
            message: format!("{} ({})", stderr.trim(), output.status),
        });
    }

    Ok(output.stdout)
}
