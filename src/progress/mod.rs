//! Progress reporting for translation jobs.

pub mod event;

pub use event::{ProgressEnvelope, ProgressEvent};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Receives job progress. Called from the job's task; implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards sequenced envelopes to an async consumer.
pub struct ChannelSink {
    sender: UnboundedSender<ProgressEnvelope>,
    seq: AtomicU64,
}

impl ChannelSink {
    pub fn new_pair() -> (Self, UnboundedReceiver<ProgressEnvelope>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender,
                seq: AtomicU64::new(0),
            },
            receiver,
        )
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(ProgressEnvelope::with_now(seq, event)).is_err() {
            debug!(seq, "Progress receiver dropped");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn terminal_events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.is_terminal())
            .cloned()
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}
