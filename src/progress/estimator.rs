//! ETA estimation
//!
//! The estimate starts from an a-priori figure derived from the used and
//! free block split, then blends toward the observed rate as the run
//! progresses:
//!
//! ```text
//! eta = (pct * observed + (100 - pct) * initial) / 100
//! ```
//!
//! Zero runs stream through a compressor far faster than real data, so
//! the a-priori figure weights the two separately.

use crate::layout::RangeModel;
use std::time::{Duration, Instant};

const MIB: f64 = 1024.0 * 1024.0;

/// Empirical seconds-per-MiB constants for the a-priori estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaModel {
    /// Seconds per MiB of used blocks
    pub data_secs_per_mib: f64,
    /// Seconds per MiB of free blocks written as zeros
    pub zero_secs_per_mib: f64,
}

impl EtaModel {
    /// Constants measured for gzip-compressed output
    ///
    /// Uncompressed output reuses them, which makes the initial figure
    /// optimistic for raw sinks.
    pub const COMPRESSED: EtaModel = EtaModel {
        data_secs_per_mib: 0.09,
        zero_secs_per_mib: 0.02,
    };

    /// A-priori ETA in seconds
    pub fn initial_eta(&self, total_blocks: u64, free_blocks: u64, block_size: u64) -> f64 {
        let used_mib = total_blocks.saturating_sub(free_blocks) as f64 * block_size as f64 / MIB;
        let free_mib = free_blocks as f64 * block_size as f64 / MIB;
        used_mib * self.data_secs_per_mib + free_mib * self.zero_secs_per_mib
    }
}

impl Default for EtaModel {
    fn default() -> Self {
        Self::COMPRESSED
    }
}

/// Running counters for one snapshot
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Bytes flushed so far
    pub bytes_written: u64,
    /// Bytes a complete run writes
    pub total_bytes_expected: u64,
    /// Seconds since the run started, as of the last update
    pub elapsed_secs: f64,
    /// A-priori ETA computed before any bytes flowed
    pub initial_eta_secs: f64,
    /// ETA as of the last update
    pub current_eta_secs: f64,
}

/// One progress report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaSnapshot {
    /// Completion in percent, 0 to 100
    pub progress_pct: f64,
    /// Estimated seconds remaining
    pub eta_secs: f64,
    /// Seconds since the run started
    pub elapsed_secs: f64,
    /// Bytes flushed so far
    pub bytes_written: u64,
}

/// Turns flush events into progress and ETA figures
#[derive(Debug)]
pub struct EtaEstimator {
    state: ProgressState,
    started: Instant,
}

impl EtaEstimator {
    /// Start estimating a run over `total_bytes`
    pub fn new(total_bytes: u64, initial_eta_secs: f64) -> Self {
        Self {
            state: ProgressState {
                bytes_written: 0,
                total_bytes_expected: total_bytes,
                elapsed_secs: 0.0,
                initial_eta_secs,
                current_eta_secs: initial_eta_secs,
            },
            started: Instant::now(),
        }
    }

    /// Start estimating a snapshot of `model`
    pub fn for_layout(model: &RangeModel, eta_model: &EtaModel) -> Self {
        let initial = eta_model.initial_eta(model.total_blocks, model.free_blocks, model.block_size);
        Self::new(model.total_bytes(), initial)
    }

    /// Current counters
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Report issued before any bytes are written
    pub fn initial_snapshot(&self) -> EtaSnapshot {
        EtaSnapshot {
            progress_pct: 0.0,
            eta_secs: self.state.initial_eta_secs,
            elapsed_secs: 0.0,
            bytes_written: 0,
        }
    }

    /// Record a flush using wall-clock time
    pub fn record(&mut self, bytes: u64) -> EtaSnapshot {
        let elapsed = self.started.elapsed();
        self.record_at(bytes, elapsed)
    }

    /// Record a flush at a given elapsed time
    pub fn record_at(&mut self, bytes: u64, elapsed: Duration) -> EtaSnapshot {
        let state = &mut self.state;
        state.bytes_written += bytes;
        state.elapsed_secs = elapsed.as_secs_f64();

        let pct = progress_pct(state.bytes_written, state.total_bytes_expected);
        state.current_eta_secs = blended_eta(pct, state.elapsed_secs, state.initial_eta_secs);

        EtaSnapshot {
            progress_pct: pct,
            eta_secs: state.current_eta_secs,
            elapsed_secs: state.elapsed_secs,
            bytes_written: state.bytes_written,
        }
    }
}

/// Completion percentage, exactly 100 once `written` reaches `total`
pub fn progress_pct(written: u64, total: u64) -> f64 {
    if written >= total {
        return 100.0;
    }
    100.0 * written as f64 / total as f64
}

/// Blend the a-priori ETA with the observed one by completion
pub fn blended_eta(pct: f64, elapsed_secs: f64, initial_eta_secs: f64) -> f64 {
    if pct <= 0.0 {
        return initial_eta_secs;
    }
    let observed = elapsed_secs / pct * 100.0 - elapsed_secs;
    (pct * observed + (100.0 - pct) * initial_eta_secs) / 100.0
}
