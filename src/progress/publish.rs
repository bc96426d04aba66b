//! Remote progress publishing
//!
//! Progress can be mirrored to a named channel on a message broker. The
//! publisher runs on its own thread behind a bounded queue so a slow or
//! dead broker never stalls the copy; failures are logged and dropped.

use crate::error::Result;
use crossbeam::channel::{bounded, Sender, TrySendError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Queue depth between the copy loop and the publisher thread
pub const PUBLISH_QUEUE_DEPTH: usize = 64;

/// Something that can publish a status string to a named channel
pub trait Publisher: Send {
    /// Publish one message
    fn publish(&mut self, channel: &str, message: &str) -> Result<()>;

    /// Release the connection
    fn close(&mut self) {}
}

/// Publisher used when no remote channel is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&mut self, _channel: &str, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Format a progress pair as `<pct>%;<eta>`
pub fn format_remote_status(progress_pct: f64, eta_secs: f64) -> String {
    format!("{:.2}%;{:.1}", progress_pct, eta_secs)
}

/// Runs a [`Publisher`] on a background thread
///
/// Itself a [`Publisher`]: `publish` only queues the message, so it
/// never blocks and never fails.
pub struct BackgroundPublisher {
    sender: Option<Sender<(String, String)>>,
    worker: Option<JoinHandle<u64>>,
    dropped: u64,
}

impl BackgroundPublisher {
    /// Start the publisher thread
    pub fn spawn(mut publisher: Box<dyn Publisher>) -> Self {
        let (sender, receiver) = bounded::<(String, String)>(PUBLISH_QUEUE_DEPTH);

        let worker = thread::Builder::new()
            .name("e2snap-publish".to_string())
            .spawn(move || {
                let mut failures = 0u64;
                for (channel, message) in receiver.iter() {
                    if let Err(e) = publisher.publish(&channel, &message) {
                        failures += 1;
                        if failures == 1 {
                            warn!("Progress publish to {} failed: {}", channel, e);
                        } else {
                            trace!("Progress publish failed again: {}", e);
                        }
                    }
                }
                publisher.close();
                failures
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Cannot start publisher thread, remote progress disabled: {}", e);
                None
            }
        };
        let sender = worker.as_ref().map(|_| sender);

        Self {
            sender,
            worker,
            dropped: 0,
        }
    }

    /// Queue a message without blocking; drops it if the queue is full
    pub fn submit(&mut self, channel: &str, message: &str) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send((channel.to_string(), message.to_string())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                trace!("Publisher queue full, dropping update");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.sender = None;
            }
        }
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.worker.take() {
            let failures = handle.join().unwrap_or(0);
            if failures > 0 || self.dropped > 0 {
                info!(failures, dropped = self.dropped, "Some progress updates were not published");
            } else {
                debug!("Publisher stopped");
            }
        }
    }
}

impl Publisher for BackgroundPublisher {
    fn publish(&mut self, channel: &str, message: &str) -> Result<()> {
        self.submit(channel, message);
        Ok(())
    }

    fn close(&mut self) {
        self.stop();
    }
}

impl Drop for BackgroundPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapError;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording {
        messages: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl Publisher for Recording {
        fn publish(&mut self, channel: &str, message: &str) -> Result<()> {
            self.messages.lock().unwrap().push((channel.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct Failing(Arc<Mutex<u32>>);

    impl Publisher for Failing {
        fn publish(&mut self, _: &str, _: &str) -> Result<()> {
            *self.0.lock().unwrap() += 1;
            Err(SnapError::Publish("connection reset".into()))
        }
    }

    /// Blocks every publish until the gate's sender is dropped
    struct Gated {
        gate: crossbeam::channel::Receiver<()>,
        inner: Recording,
    }

    impl Publisher for Gated {
        fn publish(&mut self, channel: &str, message: &str) -> Result<()> {
            let _ = self.gate.recv();
            self.inner.publish(channel, message)
        }
    }

    #[test]
    fn test_format_remote_status() {
        assert_eq!(format_remote_status(0.0, 12.345), "0.00%;12.3");
        assert_eq!(format_remote_status(99.999, 0.04), "100.00%;0.0");
    }

    #[test]
    fn test_messages_are_delivered_in_order() {
        let recording = Recording::default();
        let mut publisher = BackgroundPublisher::spawn(Box::new(recording.clone()));

        publisher.publish("/queue/snap", "0.00%;10.0").unwrap();
        publisher.publish("/queue/snap", "50.00%;5.0").unwrap();
        publisher.close();

        let messages = recording.messages.lock().unwrap();
        assert_eq!(
            *messages,
            vec![
                ("/queue/snap".to_string(), "0.00%;10.0".to_string()),
                ("/queue/snap".to_string(), "50.00%;5.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_failures_are_swallowed() {
        let attempts = Arc::new(Mutex::new(0u32));
        let mut publisher = BackgroundPublisher::spawn(Box::new(Failing(Arc::clone(&attempts))));
        assert!(publisher.publish("/queue/snap", "1.00%;1.0").is_ok());
        assert!(publisher.publish("/queue/snap", "2.00%;1.0").is_ok());
        publisher.close();
        assert_eq!(*attempts.lock().unwrap(), 2);
    }

    #[test]
    fn test_full_queue_never_blocks() {
        let (release, gate) = crossbeam::channel::bounded::<()>(0);
        let recording = Recording::default();
        let mut publisher = BackgroundPublisher::spawn(Box::new(Gated {
            gate,
            inner: recording.clone(),
        }));

        for i in 0..PUBLISH_QUEUE_DEPTH + 8 {
            publisher.publish("/queue/snap", &format!("{}.00%;1.0", i)).unwrap();
        }
        drop(release);
        publisher.close();

        let delivered = recording.messages.lock().unwrap().len();
        assert!(delivered >= PUBLISH_QUEUE_DEPTH);
        assert!(delivered < PUBLISH_QUEUE_DEPTH + 8);
    }

    #[test]
    fn test_noop_publisher() {
        let mut noop = NoopPublisher;
        assert!(noop.publish("/queue/x", "hello").is_ok());
        noop.close();
    }
}
