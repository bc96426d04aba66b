//! Output sinks
//!
//! The snapshot is written as one sequential byte stream. The kind of
//! sink is picked from the destination name: `-` is standard output,
//! a recognised compressed suffix selects a streaming encoder, and
//! anything else is a raw image file.

use crate::error::{IoResultExt, Result, SnapError};
use flate2::write::GzEncoder;
use flate2::Compression;
use lz4_flex::frame::FrameEncoder;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Stdout, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write buffer between encoders and the destination (1 MiB)
pub const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// zstd level for `.zst` output
pub const ZSTD_LEVEL: i32 = 3;

/// Kind of output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Uncompressed standard output
    Stdout,
    /// Uncompressed image file
    Raw,
    /// gzip stream (`.gz`)
    Gzip,
    /// LZ4 frame stream (`.lz4`)
    Lz4,
    /// zstd stream (`.zst`)
    Zstd,
}

impl SinkKind {
    /// Select the sink for a destination name
    pub fn for_destination(destination: &str) -> Self {
        if destination == "-" {
            return Self::Stdout;
        }
        let extension = Path::new(destination)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("gz") => Self::Gzip,
            Some("lz4") => Self::Lz4,
            Some("zst") => Self::Zstd,
            _ => Self::Raw,
        }
    }

    /// Whether the stream is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Gzip | Self::Lz4 | Self::Zstd)
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Raw => "raw",
            Self::Gzip => "gzip",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

/// Counts bytes passed to the wrapped writer
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    /// Bytes written so far
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

type FileOut = CountingWriter<BufWriter<File>>;

enum Stream {
    Stdout(CountingWriter<BufWriter<Stdout>>),
    Raw(FileOut),
    Gzip(GzEncoder<FileOut>),
    Lz4(FrameEncoder<FileOut>),
    Zstd(zstd::Encoder<'static, FileOut>),
}

/// Sizes reported when a sink is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    /// Sink kind
    pub kind: SinkKind,
    /// Bytes handed to the sink (logical snapshot size)
    pub logical_bytes: u64,
    /// Bytes that reached the destination
    pub stored_bytes: u64,
}

impl SinkStats {
    /// Stored size relative to logical size
    pub fn ratio(&self) -> f64 {
        if self.logical_bytes == 0 {
            1.0
        } else {
            self.stored_bytes as f64 / self.logical_bytes as f64
        }
    }
}

/// Sequential output for a snapshot
pub struct OutputSink {
    stream: Stream,
    kind: SinkKind,
    path: Option<PathBuf>,
    logical_bytes: u64,
}

impl OutputSink {
    /// Open the sink for a destination name
    ///
    /// Files are created exclusively; an existing file is an
    /// [`SnapError::OutputConflict`].
    pub fn open(destination: &str) -> Result<Self> {
        let kind = SinkKind::for_destination(destination);
        if kind == SinkKind::Stdout {
            debug!("Writing snapshot to standard output");
            return Ok(Self {
                stream: Stream::Stdout(CountingWriter::new(BufWriter::with_capacity(
                    WRITE_BUFFER_SIZE,
                    io::stdout(),
                ))),
                kind,
                path: None,
                logical_bytes: 0,
            });
        }

        let path = PathBuf::from(destination);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => SnapError::OutputConflict {
                    path: path.clone(),
                    kind: "file",
                },
                _ => SnapError::io(&path, e),
            })?;
        let out = CountingWriter::new(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file));

        let stream = match kind {
            SinkKind::Gzip => Stream::Gzip(GzEncoder::new(out, Compression::default())),
            SinkKind::Lz4 => Stream::Lz4(FrameEncoder::new(out)),
            SinkKind::Zstd => Stream::Zstd(zstd::Encoder::new(out, ZSTD_LEVEL).with_path(&path)?),
            SinkKind::Raw | SinkKind::Stdout => Stream::Raw(out),
        };
        debug!("Writing {} snapshot to {:?}", kind.name(), path);

        Ok(Self {
            stream,
            kind,
            path: Some(path),
            logical_bytes: 0,
        })
    }

    /// Sink kind
    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("finishing {}", path.display()),
            None => "finishing standard output".to_string(),
        }
    }

    /// Flush encoders and the destination
    pub fn finish(self) -> Result<SinkStats> {
        let context = self.describe();
        let stored = match self.stream {
            Stream::Stdout(mut w) => {
                w.flush().in_stream(|| context.clone())?;
                w.count()
            }
            Stream::Raw(mut w) => {
                w.flush().in_stream(|| context.clone())?;
                w.count()
            }
            Stream::Gzip(enc) => {
                let mut w = enc.finish().in_stream(|| context.clone())?;
                w.flush().in_stream(|| context.clone())?;
                w.count()
            }
            Stream::Lz4(enc) => {
                let mut w = enc
                    .finish()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
                    .in_stream(|| context.clone())?;
                w.flush().in_stream(|| context.clone())?;
                w.count()
            }
            Stream::Zstd(enc) => {
                let mut w = enc.finish().in_stream(|| context.clone())?;
                w.flush().in_stream(|| context.clone())?;
                w.count()
            }
        };

        Ok(SinkStats {
            kind: self.kind,
            logical_bytes: self.logical_bytes,
            stored_bytes: stored,
        })
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match &mut self.stream {
            Stream::Stdout(w) => w.write(buf)?,
            Stream::Raw(w) => w.write(buf)?,
            Stream::Gzip(w) => w.write(buf)?,
            Stream::Lz4(w) => w.write(buf)?,
            Stream::Zstd(w) => w.write(buf)?,
        };
        self.logical_bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stream {
            Stream::Stdout(w) => w.flush(),
            Stream::Raw(w) => w.flush(),
            Stream::Gzip(w) => w.flush(),
            Stream::Lz4(w) => w.flush(),
            Stream::Zstd(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    fn payload() -> Vec<u8> {
        let mut data = b"superblock and inode tables ".repeat(200);
        data.extend(std::iter::repeat(0u8).take(64 * 1024));
        data
    }

    fn write_through(path: &Path) -> SinkStats {
        let mut sink = OutputSink::open(path.to_str().unwrap()).unwrap();
        sink.write_all(&payload()).unwrap();
        sink.finish().unwrap()
    }

    #[test]
    fn test_kind_selection() {
        assert_eq!(SinkKind::for_destination("-"), SinkKind::Stdout);
        assert_eq!(SinkKind::for_destination("/backup/sda1.img.gz"), SinkKind::Gzip);
        assert_eq!(SinkKind::for_destination("sda1.IMG.GZ"), SinkKind::Gzip);
        assert_eq!(SinkKind::for_destination("sda1.lz4"), SinkKind::Lz4);
        assert_eq!(SinkKind::for_destination("sda1.zst"), SinkKind::Zstd);
        assert_eq!(SinkKind::for_destination("sda1.img"), SinkKind::Raw);
        assert_eq!(SinkKind::for_destination("gz"), SinkKind::Raw);
        assert!(!SinkKind::Stdout.is_compressed());
    }

    #[test]
    fn test_raw_sink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.img");
        let stats = write_through(&path);

        assert_eq!(stats.kind, SinkKind::Raw);
        assert_eq!(stats.logical_bytes, payload().len() as u64);
        assert_eq!(stats.stored_bytes, stats.logical_bytes);
        assert_eq!(std::fs::read(&path).unwrap(), payload());
    }

    #[test]
    fn test_gzip_sink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.img.gz");
        let stats = write_through(&path);
        assert!(stats.ratio() < 0.5);

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(File::open(&path).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload());
    }

    #[test]
    fn test_lz4_sink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.img.lz4");
        write_through(&path);

        let mut decoded = Vec::new();
        lz4_flex::frame::FrameDecoder::new(File::open(&path).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload());
    }

    #[test]
    fn test_zstd_sink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.img.zst");
        let stats = write_through(&path);

        let decoded = zstd::decode_all(File::open(&path).unwrap()).unwrap();
        assert_eq!(decoded, payload());
        assert_eq!(stats.stored_bytes, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_existing_file_is_conflict() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exists.img");
        std::fs::write(&path, b"keep me").unwrap();

        let err = OutputSink::open(path.to_str().unwrap()).err().unwrap();
        assert!(matches!(err, SnapError::OutputConflict { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }
}
