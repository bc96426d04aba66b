//! Snapshot engine
//!
//! Runs the whole pipeline for one invocation: open the source, check
//! the destination, load the layout, plan, then stream every operation
//! through the copier while progress fans out to the display and the
//! optional remote channel.

use crate::config::{RemoteSettings, SnapshotConfig};
use crate::core::copier::{CopyStats, StreamingCopier};
use crate::core::plan::{CopyPlan, PlanGenerator};
use crate::error::Result;
use crate::fs::{check_destination, open_source, OutputSink, SinkStats};
use crate::network::StompClient;
use crate::progress::{BackgroundPublisher, EtaEstimator, EtaModel, ProgressReporter, ProgressSink};
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of a snapshot run
#[derive(Debug, Clone)]
pub struct SnapshotResult {
    /// Copy and zero-fill totals
    pub copy: CopyStats,
    /// Output sizes, absent on dry runs
    pub output: Option<SinkStats>,
    /// Operations in the plan
    pub operations: usize,
    /// Logical size of the filesystem
    pub total_bytes: u64,
    /// Final progress percentage
    pub progress_pct: f64,
    /// Wall-clock duration
    pub duration: Duration,
    /// Average throughput in bytes/second
    pub throughput: f64,
    /// Nothing was written
    pub dry_run: bool,
}

impl SnapshotResult {
    /// Every block of the filesystem reached the output
    pub fn is_complete(&self) -> bool {
        self.dry_run || self.copy.bytes_written() == self.total_bytes
    }

    /// Print summary to stderr
    pub fn print_summary(&self) {
        let size = |n: u64| humansize::format_size(n, humansize::BINARY);
        let duration = Duration::from_millis(self.duration.as_millis() as u64);

        eprintln!("\n=== Snapshot Summary ===");
        eprintln!("Filesystem:   {}", size(self.total_bytes));
        eprintln!("Operations:   {}", self.operations);
        eprintln!("Copied:       {}", size(self.copy.bytes_copied));
        eprintln!("Zero-filled:  {}", size(self.copy.bytes_zeroed));
        if let Some(output) = &self.output {
            if output.kind.is_compressed() {
                eprintln!(
                    "Stored:       {} ({}, {:.1}% of logical size)",
                    size(output.stored_bytes),
                    output.kind.name(),
                    output.ratio() * 100.0
                );
            } else {
                eprintln!("Stored:       {} ({})", size(output.stored_bytes), output.kind.name());
            }
        }
        eprintln!("Duration:     {}", humantime::format_duration(duration));
        eprintln!("Throughput:   {}/s", size(self.throughput as u64));
    }
}

/// Stream a plan from `source` into `sink`, reporting after every flush
pub fn run_snapshot<R, W>(
    plan: &CopyPlan,
    source: R,
    sink: &mut W,
    buffer_limit: usize,
    estimator: &mut EtaEstimator,
    progress: &mut ProgressSink,
) -> Result<CopyStats>
where
    R: Read + Seek,
    W: Write + ?Sized,
{
    let mut copier = StreamingCopier::with_buffer_limit(source, plan.block_size, buffer_limit);
    let mut observer = |bytes: u64| {
        let snapshot = estimator.record(bytes);
        progress.report(&snapshot);
    };
    copier.run_plan(plan, sink, &mut observer)
}

/// Connect to the broker named in the remote configuration file
pub fn connect_remote(config_path: &Path) -> Result<BackgroundPublisher> {
    let settings = RemoteSettings::load(config_path)?;
    let client = StompClient::connect(&settings.stomp)?;
    Ok(BackgroundPublisher::spawn(Box::new(client)))
}

/// Main snapshot engine
pub struct SnapshotEngine {
    config: SnapshotConfig,
    eta_model: EtaModel,
    progress: Option<ProgressSink>,
}

impl SnapshotEngine {
    /// Create a new engine
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            config,
            eta_model: EtaModel::default(),
            progress: None,
        }
    }

    /// Use a specific progress sink instead of one built from the config
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Override the a-priori ETA constants
    pub fn with_eta_model(mut self, eta_model: EtaModel) -> Self {
        self.eta_model = eta_model;
        self
    }

    /// Local display plus the remote channel when one is configured
    ///
    /// Remote problems are logged and leave the no-op publisher in place;
    /// they never fail the run.
    fn default_progress(&self) -> ProgressSink {
        let reporter = ProgressReporter::for_flags(self.config.quiet, self.config.verbose);
        let sink = ProgressSink::new(reporter);
        let Some(channel) = &self.config.channel else {
            return sink;
        };

        match connect_remote(&self.config.config_path) {
            Ok(remote) => {
                info!("Publishing progress to {}", channel);
                sink.with_remote(Box::new(remote), channel.clone())
            }
            Err(e) if !e.is_fatal() => {
                warn!("{}; remote progress disabled", e);
                sink
            }
            Err(e) => {
                error!("Remote progress unavailable: {}", e);
                sink
            }
        }
    }

    /// Execute the snapshot
    pub fn execute(mut self) -> Result<SnapshotResult> {
        let start_time = Instant::now();
        let config = &self.config;

        let source = open_source(&config.source)?;
        check_destination(&config.destination)?;

        let model = config.layout.load()?;
        let plan = PlanGenerator::new().generate(&model);
        info!(
            groups = model.groups.len(),
            operations = plan.len(),
            copy_bytes = plan.copy_bytes(),
            zero_bytes = plan.zero_bytes(),
            "Planned snapshot of {}",
            config.source.display()
        );

        if config.dry_run {
            plan.print_summary();
            return Ok(SnapshotResult {
                copy: CopyStats::default(),
                output: None,
                operations: plan.len(),
                total_bytes: model.total_bytes(),
                progress_pct: 0.0,
                duration: start_time.elapsed(),
                throughput: 0.0,
                dry_run: true,
            });
        }

        let mut progress = match self.progress.take() {
            Some(progress) => progress,
            None => self.default_progress(),
        };
        let config = &self.config;

        let mut estimator = EtaEstimator::for_layout(&model, &self.eta_model);
        progress.report(&estimator.initial_snapshot());

        let mut sink = OutputSink::open(&config.destination)?;
        debug!("Output is a {} stream", sink.kind().name());
        let copy = run_snapshot(&plan, source, &mut sink, config.buffer_size, &mut estimator, &mut progress)?;
        let output = sink.finish()?;
        progress.finish();

        let duration = start_time.elapsed();
        let throughput = copy.bytes_written() as f64 / duration.as_secs_f64().max(f64::EPSILON);
        let progress_pct = crate::progress::estimator::progress_pct(
            estimator.state().bytes_written,
            estimator.state().total_bytes_expected,
        );

        Ok(SnapshotResult {
            copy,
            output: Some(output),
            operations: plan.len(),
            total_bytes: model.total_bytes(),
            progress_pct,
            duration,
            throughput,
            dry_run: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapError;
    use crate::layout::LayoutSource;
    use std::io::Read;
    use std::path::{Path, PathBuf};
    use tempfile::{tempdir, TempDir};

    const BLOCK: usize = 1024;

    const LAYOUT: &str = "\
Block count:              64
Free blocks:              19
First block:              1
Block size:               1024

Group 0: (Blocks 1-32)
  Free blocks: 5-9, 20-32
Group 1: (Blocks 33-63)
  Free blocks: 63
";

    struct Fixture {
        dir: TempDir,
        image: Vec<u8>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let image: Vec<u8> = (0..64 * BLOCK).map(|i| (i / BLOCK) as u8 + 1).collect();
            std::fs::write(dir.path().join("fs.img"), &image).unwrap();
            std::fs::write(dir.path().join("layout.txt"), LAYOUT).unwrap();
            Self { dir, image }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn config(&self, destination: &Path) -> SnapshotConfig {
            SnapshotConfig {
                source: self.path("fs.img"),
                destination: destination.to_str().unwrap().to_string(),
                buffer_size: 3000,
                layout: LayoutSource::File(self.path("layout.txt")),
                quiet: true,
                ..Default::default()
            }
        }

        fn expected(&self) -> Vec<u8> {
            let mut expected = self.image.clone();
            for block in (5..=9).chain(20..=32).chain(63..=63) {
                expected[block * BLOCK..(block + 1) * BLOCK].fill(0);
            }
            expected
        }
    }

    #[test]
    fn test_snapshot_to_gzip() {
        let fx = Fixture::new();
        let dest = fx.path("snap.img.gz");

        let result = SnapshotEngine::new(fx.config(&dest))
            .with_progress(ProgressSink::disabled())
            .execute()
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(result.progress_pct, 100.0);
        assert_eq!(result.copy.bytes_zeroed, 19 * BLOCK as u64);
        assert_eq!(result.copy.bytes_written(), 64 * BLOCK as u64);

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(std::fs::File::open(&dest).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, fx.expected());
    }

    #[test]
    fn test_snapshot_to_raw_file() {
        let fx = Fixture::new();
        let dest = fx.path("snap.img");

        let result = SnapshotEngine::new(fx.config(&dest)).execute().unwrap();
        assert_eq!(result.output.unwrap().stored_bytes, 64 * BLOCK as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), fx.expected());
    }

    #[test]
    fn test_existing_destination_is_untouched() {
        let fx = Fixture::new();
        let dest = fx.path("taken.img");
        std::fs::write(&dest, b"previous backup").unwrap();

        let err = SnapshotEngine::new(fx.config(&dest)).execute().unwrap_err();
        assert!(matches!(err, SnapError::OutputConflict { .. }));
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous backup");
    }

    #[test]
    fn test_missing_source_fails_before_output() {
        let fx = Fixture::new();
        let dest = fx.path("never.img");
        let mut config = fx.config(&dest);
        config.source = fx.path("missing.img");

        let err = SnapshotEngine::new(config).execute().unwrap_err();
        assert!(matches!(err, SnapError::InputAccess { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_bad_layout_fails_before_output() {
        let fx = Fixture::new();
        std::fs::write(fx.path("bad.txt"), "Block count: 64\nFree blocks: 0\nBlock size: 1024\n\nGroup 0: (Blocks 0-40)\n")
            .unwrap();
        let dest = fx.path("never.img");
        let mut config = fx.config(&dest);
        config.layout = LayoutSource::File(fx.path("bad.txt"));

        assert!(SnapshotEngine::new(config).execute().is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let fx = Fixture::new();
        let dest = fx.path("dry.img.gz");
        let mut config = fx.config(&dest);
        config.dry_run = true;

        let result = SnapshotEngine::new(config).execute().unwrap();
        assert!(result.dry_run);
        assert_eq!(result.operations, 7);
        assert!(!dest.exists());
    }

    #[test]
    fn test_unreachable_remote_does_not_fail_run() {
        let fx = Fixture::new();
        std::fs::write(
            fx.path("remote.json"),
            r#"{"stomp": {"server": "127.0.0.1", "port": 1, "user": "u", "password": "p"}}"#,
        )
        .unwrap();
        let dest = fx.path("remote.img");
        let mut config = fx.config(&dest);
        config.channel = Some("/queue/progress".to_string());
        config.config_path = fx.path("remote.json");

        let err = connect_remote(&config.config_path).err().unwrap();
        assert!(!err.is_fatal());
        let result = SnapshotEngine::new(config).execute().unwrap();
        assert!(result.is_complete());
    }

    #[test]
    fn test_missing_remote_config_does_not_fail_run() {
        let fx = Fixture::new();
        let dest = fx.path("no-config.img");
        let mut config = fx.config(&dest);
        config.channel = Some("/queue/progress".to_string());
        config.config_path = fx.path("absent.json");

        assert!(matches!(connect_remote(&config.config_path), Err(SnapError::Config(_))));
        let result = SnapshotEngine::new(config).execute().unwrap();
        assert!(result.is_complete());
    }

    #[test]
    fn test_run_snapshot_reports_every_flush() {
        let fx = Fixture::new();
        let model = LayoutSource::File(fx.path("layout.txt")).load().unwrap();
        let plan = PlanGenerator::new().generate(&model);
        let mut estimator = EtaEstimator::for_layout(&model, &EtaModel::default());
        let mut progress = ProgressSink::disabled();
        let mut out = Vec::new();

        let stats = run_snapshot(
            &plan,
            std::io::Cursor::new(fx.image.clone()),
            &mut out,
            4096,
            &mut estimator,
            &mut progress,
        )
        .unwrap();

        assert_eq!(stats.bytes_written(), out.len() as u64);
        assert_eq!(out, fx.expected());
        assert!(progress.updates() >= plan.len() as u64);
        assert!(progress.reporter().last_line().unwrap().contains("100%"));
    }
}
