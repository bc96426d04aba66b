//! Progress fan-out
//!
//! Every estimator snapshot goes to the local display and to the remote
//! publisher. Without a remote channel the publisher is a no-op.

use crate::progress::estimator::EtaSnapshot;
use crate::progress::publish::{format_remote_status, NoopPublisher, Publisher};
use crate::progress::reporter::ProgressReporter;
use tracing::debug;

/// Fans progress out to the display and the remote channel
pub struct ProgressSink {
    reporter: ProgressReporter,
    remote: Box<dyn Publisher>,
    channel: String,
    updates: u64,
}

impl ProgressSink {
    /// Display-only sink
    pub fn new(reporter: ProgressReporter) -> Self {
        Self {
            reporter,
            remote: Box::new(NoopPublisher),
            channel: String::new(),
            updates: 0,
        }
    }

    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self::new(ProgressReporter::disabled())
    }

    /// Also publish every update to `channel`
    pub fn with_remote(mut self, remote: Box<dyn Publisher>, channel: impl Into<String>) -> Self {
        self.remote = remote;
        self.channel = channel.into();
        self
    }

    /// Updates reported so far
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Local display
    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Report one snapshot
    pub fn report(&mut self, snapshot: &EtaSnapshot) {
        let status = format_remote_status(snapshot.progress_pct, snapshot.eta_secs);
        if let Err(e) = self.remote.publish(&self.channel, &status) {
            debug!("Progress publish failed: {}", e);
        }
        self.reporter.update(snapshot);
        self.updates += 1;
    }

    /// Finish the display and release the remote channel
    pub fn finish(mut self) {
        self.reporter.finish();
        self.remote.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::progress::publish::BackgroundPublisher;
    use std::sync::{Arc, Mutex};

    struct Collect(Arc<Mutex<Vec<String>>>);

    impl Publisher for Collect {
        fn publish(&mut self, _channel: &str, message: &str) -> Result<()> {
            self.0.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_fan_out() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let remote = BackgroundPublisher::spawn(Box::new(Collect(Arc::clone(&seen))));
        let mut sink = ProgressSink::disabled().with_remote(Box::new(remote), "/topic/progress");

        sink.report(&EtaSnapshot {
            progress_pct: 0.0,
            eta_secs: 20.0,
            elapsed_secs: 0.0,
            bytes_written: 0,
        });
        sink.report(&EtaSnapshot {
            progress_pct: 100.0,
            eta_secs: 0.0,
            elapsed_secs: 4.0,
            bytes_written: 4096,
        });
        assert_eq!(sink.updates(), 2);
        assert!(sink.reporter().last_line().unwrap().contains("100%"));
        sink.finish();

        assert_eq!(*seen.lock().unwrap(), vec!["0.00%;20.0", "100.00%;0.0"]);
    }

    #[test]
    fn test_failing_remote_does_not_stop_display() {
        struct Down;
        impl Publisher for Down {
            fn publish(&mut self, _: &str, _: &str) -> Result<()> {
                Err(crate::error::SnapError::Publish("broker gone".into()))
            }
        }

        let mut sink = ProgressSink::disabled().with_remote(Box::new(Down), "/queue/p");
        sink.report(&EtaSnapshot {
            progress_pct: 50.0,
            eta_secs: 1.0,
            elapsed_secs: 1.0,
            bytes_written: 10,
        });
        assert_eq!(sink.updates(), 1);
        assert!(sink.reporter().last_line().unwrap().contains(" 50%"));
    }
}
