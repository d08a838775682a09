//! Bounded handoff between acquisition and publication.
//!
//! A single producer pushes serialized readings, a single consumer drains
//! them into a [`PayloadSink`]. The queue holds at most
//! [`DELIVERY_QUEUE_CAPACITY`] payloads; a full queue suspends the producer
//! instead of dropping.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::publisher::PayloadSink;

/// Maximum number of payloads waiting for the publisher.
pub const DELIVERY_QUEUE_CAPACITY: usize = 100;

/// Producer side of the delivery queue.
pub type PayloadSender = mpsc::Sender<Vec<u8>>;

/// Consumer side of the delivery queue.
pub type PayloadReceiver = mpsc::Receiver<Vec<u8>>;

/// Create the delivery queue.
pub fn channel() -> (PayloadSender, PayloadReceiver) {
    mpsc::channel(DELIVERY_QUEUE_CAPACITY)
}

/// Publish every queued payload in FIFO order until the queue is closed
/// and empty.
///
/// Failed publishes are logged and counted, never re-queued.
pub async fn drain<S: PayloadSink>(mut rx: PayloadReceiver, sink: &S) -> PublishStats {
    let mut stats = PublishStats::default();

    while let Some(payload) = rx.recv().await {
        match sink.publish(payload).await {
            Ok(()) => stats.success += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(error = %e, "Failed to publish telemetry");
            }
        }
        debug!(pending = rx.len(), "Delivery queue depth");
    }

    info!(
        published = stats.success,
        failed = stats.failed,
        "Delivery queue closed"
    );

    stats
}

/// Statistics from draining the delivery queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Number of successfully published payloads.
    pub success: usize,
    /// Number of failed publishes.
    pub failed: usize,
}

impl PublishStats {
    /// Total number of attempted publishes.
    pub fn total(&self) -> usize {
        self.success + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.success as f64 / self.total() as f64) * 100.0
        }
    }
}
