//! Configuration settings for e2snap
//!
//! Defines the CLI arguments, defaults and the runtime configuration
//! derived from them.

use crate::config::remote::DEFAULT_CONFIG_PATH;
use crate::core::DEFAULT_BUFFER_LIMIT;
use crate::layout::{LayoutSource, DEFAULT_METADATA_TOOL};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// e2snap - sparse copy of ext2/ext3 filesystems
#[derive(Parser, Debug, Clone)]
#[command(name = "e2snap")]
#[command(author = "e2snap Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Copy the used blocks of an ext2/ext3 filesystem, zero-filling free ones")]
#[command(long_about = r#"
e2snap copies an ext2/ext3 filesystem image or device block by block,
reading only the blocks the filesystem uses and writing zeros in place of
free blocks. The output has the same logical size as the source and
compresses far better than a raw device copy.

Output selection:
  out.img.gz    gzip-compressed
  out.img.lz4   LZ4 frame
  out.img.zst   zstd
  -             standard output, uncompressed
  anything else raw image

If CHANNEL is given, progress is also published to that STOMP
destination using the broker from the configuration file.

Examples:
  e2snap /dev/sdb1 backup.img.gz
  e2snap /dev/sdb1 - | ssh host 'cat > sdb1.img'
  e2snap /dev/sdb1 backup.img.gz /queue/backup-progress
"#)]
#[command(args_conflicts_with_subcommands = true)]
pub struct CliArgs {
    /// Source block device or filesystem image
    #[arg(value_name = "SOURCE")]
    pub source: Option<PathBuf>,

    /// Destination file, or '-' for standard output
    #[arg(value_name = "DESTINATION")]
    pub destination: Option<String>,

    /// STOMP destination for progress updates
    #[arg(value_name = "CHANNEL")]
    pub channel: Option<String>,

    /// Maximum bytes held in memory per transfer (e.g., 16M, 512K)
    #[arg(short = 'b', long, default_value = "16M", value_name = "SIZE")]
    pub buffer_size: String,

    /// Read a captured metadata listing instead of running the metadata tool
    #[arg(long, value_name = "FILE")]
    pub layout: Option<PathBuf>,

    /// Metadata tool to run against the source
    #[arg(long, default_value = DEFAULT_METADATA_TOOL, value_name = "PROGRAM")]
    pub dumpe2fs: String,

    /// Remote progress configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, value_name = "PATH", env = "E2SNAP_CONFIG")]
    pub config: PathBuf,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (no progress bar or summary)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Parse and plan only, write nothing
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Write a sample remote progress configuration
    #[command(name = "init-config")]
    InitConfig {
        /// Where to write it
        #[arg(default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Source device or image
    pub source: PathBuf,
    /// Destination name as given ('-' for stdout)
    pub destination: String,
    /// STOMP destination for progress, if any
    pub channel: Option<String>,
    /// Buffer limit in bytes
    pub buffer_size: usize,
    /// Where the metadata listing comes from
    pub layout: LayoutSource,
    /// Remote progress configuration file
    pub config_path: PathBuf,
    /// Append progress lines instead of redrawing
    pub verbose: bool,
    /// Suppress progress and summary
    pub quiet: bool,
    /// Parse and plan only
    pub dry_run: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            destination: String::new(),
            channel: None,
            buffer_size: DEFAULT_BUFFER_LIMIT,
            layout: LayoutSource::File(PathBuf::new()),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            verbose: false,
            quiet: false,
            dry_run: false,
        }
    }
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(['G', 'B']), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(['M', 'B']), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(['K', 'B']), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    if num < 0.0 {
        return Err(format!("Negative size: {}", num_str));
    }

    Ok((num * multiplier as f64) as u64)
}

impl SnapshotConfig {
    /// Create config from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        let source = args.source.clone().ok_or("Source path required")?;
        let destination = args.destination.clone().ok_or("Destination path required")?;

        let buffer_size = parse_size(&args.buffer_size).map_err(|e| format!("Invalid buffer size: {}", e))?;
        if buffer_size == 0 {
            return Err("Buffer size must be positive".to_string());
        }

        let layout = match &args.layout {
            Some(path) => LayoutSource::File(path.clone()),
            None => LayoutSource::Tool {
                program: args.dumpe2fs.clone(),
                device: source.clone(),
            },
        };

        Ok(Self {
            source,
            destination,
            channel: args.channel.clone(),
            buffer_size: usize::try_from(buffer_size).map_err(|_| "Buffer size too large".to_string())?,
            layout,
            config_path: args.config.clone(),
            verbose: args.verbose > 0,
            quiet: args.quiet,
            dry_run: args.dry_run,
        })
    }

    /// Whether output goes to standard output
    pub fn writes_to_stdout(&self) -> bool {
        self.destination == "-"
    }
}
