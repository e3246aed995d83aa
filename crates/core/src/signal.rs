//! Tracker signal bus — out-of-band notifications published by the pipeline.
//!
//! Modules accept an `Arc<dyn SignalSink>` to report dropped batches,
//! capacity evictions, persistence degradation, and location refresh
//! requests without coupling to the observer.

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerSignal {
    /// The tracker wants fresh location data to enrich outgoing events.
    LocationUpdateRequired,
    /// Oldest events were evicted to admit new ones under capacity pressure.
    EventsEvicted { count: usize },
    /// A batch was dropped after rejection or retry exhaustion.
    BatchDropped {
        batch_id: Uuid,
        entry_count: usize,
        reason: DropReason,
    },
    /// The journal failed; the queue continues memory-only.
    PersistenceDegraded { detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Non-retryable rejection by the ingestion endpoint.
    Rejected,
    /// The retry budget for the batch ran out.
    RetriesExhausted,
}

/// Trait for publishing tracker signals to an observer.
pub trait SignalSink: Send + Sync {
    fn publish(&self, signal: TrackerSignal);
}

/// No-op sink for callers that don't observe signals.
pub struct NoOpSink;

impl SignalSink for NoOpSink {
    fn publish(&self, _signal: TrackerSignal) {}
}

/// In-memory sink that captures signals for testing.
#[derive(Default)]
pub struct CaptureSink {
    signals: Mutex<Vec<TrackerSignal>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn signals(&self) -> Vec<TrackerSignal> {
        self.signals.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn count_dropped(&self) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|s| matches!(s, TrackerSignal::BatchDropped { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.signals.lock().clear();
    }
}

impl SignalSink for CaptureSink {
    fn publish(&self, signal: TrackerSignal) {
        self.signals.lock().push(signal);
    }
}

/// Sink that forwards signals into a tokio channel, for callers that want
/// to consume them as a message stream. Publishing never blocks; signals
/// sent after the receiver is dropped are discarded.
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<TrackerSignal>,
}

impl SignalSink for ChannelSink {
    fn publish(&self, signal: TrackerSignal) {
        let _ = self.sender.send(signal);
    }
}

/// Convenience: create a no-op sink.
pub fn noop_sink() -> Arc<dyn SignalSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

/// Convenience: create a channel-backed sink plus its receiving half.
pub fn channel_sink() -> (
    Arc<ChannelSink>,
    tokio::sync::mpsc::UnboundedReceiver<TrackerSignal>,
) {
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    (Arc::new(ChannelSink { sender }), receiver)
}
