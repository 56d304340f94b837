// Wire - event fan-out for one root run
//
// Single producer, many consumers. Each subscriber gets a bounded channel;
// when a subscriber's buffer is full, StepDelta events are dropped for that
// subscriber while completion and run lifecycle events apply backpressure.
// State reconstruction downstream depends on StepCompleted and RUN_* events,
// so those are never lossy.
//
// Nested runs share the parent's wire: all descendant events flow into the
// same stream, distinguished by depth and parent_run_id on the envelope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::events::StepEvent;

const DEFAULT_BUFFER: usize = 256;

/// Cloneable handle to a per-run event bus
#[derive(Clone)]
pub struct Wire {
    inner: Arc<WireInner>,
}

struct WireInner {
    capacity: usize,
    subscribers: tokio::sync::Mutex<Vec<mpsc::Sender<StepEvent>>>,
    closed: AtomicBool,
}

impl Default for Wire {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl Wire {
    /// Create a wire with the given per-subscriber buffer capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(WireInner {
                capacity: capacity.max(1),
                subscribers: tokio::sync::Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Emit an event to all subscribers.
    ///
    /// With no subscribers this is a no-op. Deltas are dropped per-subscriber
    /// when a buffer is full; other events await capacity.
    pub async fn emit(&self, event: StepEvent) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }

        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.retain(|tx| !tx.is_closed());

        if subscribers.is_empty() {
            return;
        }

        if event.is_delta() {
            for tx in subscribers.iter() {
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event.clone()) {
                    debug!(kind = event.kind(), "wire_delta_dropped");
                }
            }
        } else {
            for tx in subscribers.iter() {
                // Ignore receivers that hung up between retain and send
                let _ = tx.send(event.clone()).await;
            }
        }
    }

    /// Register a consumer. Returns a finite stream that ends when the wire
    /// closes (or immediately if it already has).
    pub async fn subscribe(&self) -> ReceiverStream<StepEvent> {
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        if !self.inner.closed.load(Ordering::Acquire) {
            self.inner.subscribers.lock().await.push(tx);
        }
        // If closed, tx is dropped here and the stream terminates at once.

        ReceiverStream::new(rx)
    }

    /// Close the wire, terminating all subscriber streams
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.subscribers.lock().await.clear();
    }

    /// Whether the wire has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of live subscribers
    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire")
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
