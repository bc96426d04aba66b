//! Streaming copier
//!
//! Executes [`CopyOperation`]s against a live source and an output
//! sink through a single bounded buffer. A copy of any size never holds
//! more than `buffer_limit` bytes, and zero runs are served from the same
//! buffer.

use crate::core::plan::{CopyOperation, CopyPlan};
use crate::error::{IoResultExt, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use std::time::Instant;
use tracing::debug;

/// Default buffer limit (16 MiB)
pub const DEFAULT_BUFFER_LIMIT: usize = 16 * 1024 * 1024;

/// Receives the size of every chunk written to the sink
pub trait FlushObserver {
    /// Called after each chunk has been handed to the sink
    fn on_flush(&mut self, bytes: u64);
}

impl<F: FnMut(u64)> FlushObserver for F {
    fn on_flush(&mut self, bytes: u64) {
        self(bytes)
    }
}

/// The single bounded buffer shared by copy and zero-fill operations
///
/// Copies read into a prefix of the buffer; zero runs are served from a
/// prefix that is re-zeroed only where a previous copy dirtied it.
#[derive(Debug)]
pub struct ChunkBuffer {
    buf: Vec<u8>,
    limit: usize,
    zeroed: usize,
}

impl ChunkBuffer {
    /// Create a buffer that never allocates more than `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit: limit.max(1),
            zeroed: 0,
        }
    }

    fn grow(&mut self, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
    }

    /// Borrow `len` zero bytes, `len` capped at the limit
    pub fn zeros(&mut self, len: usize) -> &[u8] {
        let len = len.min(self.limit);
        self.grow(len);
        if self.zeroed < len {
            self.buf[self.zeroed..len].fill(0);
            self.zeroed = len;
        }
        &self.buf[..len]
    }

    /// Borrow `len` bytes to read source data into, `len` capped at the limit
    pub fn data(&mut self, len: usize) -> &mut [u8] {
        let len = len.min(self.limit);
        self.grow(len);
        self.zeroed = 0;
        &mut self.buf[..len]
    }

    /// Bytes currently allocated
    pub fn allocated(&self) -> usize {
        self.buf.len()
    }
}

/// Totals for a completed plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Bytes read from the source and written verbatim
    pub bytes_copied: u64,
    /// Bytes written as zero fill
    pub bytes_zeroed: u64,
    /// Copy operations executed
    pub copy_operations: u64,
    /// Zero operations executed
    pub zero_operations: u64,
}

impl CopyStats {
    /// All bytes written to the sink
    pub fn bytes_written(&self) -> u64 {
        self.bytes_copied + self.bytes_zeroed
    }
}

/// Bounded-buffer executor for copy operations
pub struct StreamingCopier<R> {
    source: R,
    block_size: u64,
    buffer_limit: usize,
    buffer: ChunkBuffer,
}

impl<R: Read + Seek> StreamingCopier<R> {
    /// Create a copier over `source` with the default buffer limit
    pub fn new(source: R, block_size: u64) -> Self {
        Self::with_buffer_limit(source, block_size, DEFAULT_BUFFER_LIMIT)
    }

    /// Create a copier with a custom buffer limit
    pub fn with_buffer_limit(source: R, block_size: u64, buffer_limit: usize) -> Self {
        let buffer_limit = buffer_limit.max(1);
        Self {
            source,
            block_size,
            buffer_limit,
            buffer: ChunkBuffer::new(buffer_limit),
        }
    }

    /// Configured buffer limit
    pub fn buffer_limit(&self) -> usize {
        self.buffer_limit
    }

    /// Bytes held by the transfer buffer
    pub fn peak_allocation(&self) -> usize {
        self.buffer.allocated()
    }

    /// Give back the source
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Execute one operation, returning the bytes written
    pub fn execute<W, O>(&mut self, op: &CopyOperation, sink: &mut W, observer: &mut O) -> Result<u64>
    where
        W: Write + ?Sized,
        O: FlushObserver + ?Sized,
    {
        let range = op.range();
        let total = op.byte_len(self.block_size);
        debug!(
            "{} from block {} to {} number of bytes {}",
            op.label(),
            range.start,
            range.end,
            total
        );

        if !op.is_zero() {
            let offset = range.start * self.block_size;
            self.source
                .seek(SeekFrom::Start(offset))
                .in_stream(|| format!("seeking source to block {}", range.start))?;
        }

        let mut remaining = total;
        while remaining > 0 {
            let count = remaining.min(self.buffer_limit as u64) as usize;
            let started = Instant::now();

            if op.is_zero() {
                let chunk = self.buffer.zeros(count);
                sink.write_all(chunk)
                    .in_stream(|| format!("writing zeros for blocks {}", range))?;
            } else {
                let chunk = self.buffer.data(count);
                self.source
                    .read_exact(chunk)
                    .in_stream(|| format!("reading blocks {}", range))?;
                sink.write_all(chunk)
                    .in_stream(|| format!("writing blocks {}", range))?;
            }

            remaining -= count as u64;

            let secs = started.elapsed().as_secs_f64();
            if secs > 0.0 {
                debug!("{} bytes in {:.4} sec, {:.0} bytes/s", count, secs, count as f64 / secs);
            }
            observer.on_flush(count as u64);
        }

        Ok(total)
    }

    /// Execute every operation of a plan in order
    pub fn run_plan<W, O>(&mut self, plan: &CopyPlan, sink: &mut W, observer: &mut O) -> Result<CopyStats>
    where
        W: Write + ?Sized,
        O: FlushObserver + ?Sized,
    {
        let mut stats = CopyStats::default();

        for op in &plan.operations {
            let written = self.execute(op, sink, observer)?;
            if op.is_zero() {
                stats.bytes_zeroed += written;
                stats.zero_operations += 1;
            } else {
                stats.bytes_copied += written;
                stats.copy_operations += 1;
            }
        }

        Ok(stats)
    }
}
