//! Event-notification sink.
//!
//! Live-UI updates are best-effort: posting never blocks and a dropped
//! event is acceptable, so there is no backpressure and no retry. Grading
//! throughput must never wait on a listener.

use common::event::GenericEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Fire-and-forget broadcast used for live UI updates.
pub trait EventSink: Send + Sync {
    /// Post an event. Must not block.
    fn post(&self, event: GenericEvent);
}

/// Sink backed by a tokio broadcast channel. Events posted with no
/// subscribers, or past a lagging subscriber's capacity, are dropped.
pub struct BroadcastSink {
    tx: broadcast::Sender<GenericEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity);
        Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenericEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn post(&self, event: GenericEvent) {
        trace!(topic = %event.topic, "Posting event");
        let _ = self.tx.send(event);
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn post(&self, _event: GenericEvent) {}
}
