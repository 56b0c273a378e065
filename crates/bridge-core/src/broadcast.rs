//! Fan-out of backend output lines to subscribers.
//!
//! Every subscriber owns a bounded queue. Publishing never blocks: when a
//! queue is full the newest line is dropped for that subscriber only, so a
//! slow client loses lines instead of stalling the backend or its peers.
//! Closing the broadcaster flips a shutdown signal and closes every queue
//! (lines already buffered stay readable).
//!
//! Lines over the backend's size limit travel as [`Line::Oversized`]
//! markers. [`Subscription::recv`] skips them; [`Subscription::recv_line`]
//! hands them to callers that must fail on an oversized reply.

use crate::codec::Line;
use crate::error::{BridgeError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Registry {
    subscribers: HashMap<u64, mpsc::Sender<Line>>,
    next_id: u64,
    closed: bool,
}

/// Result of a single [`Broadcaster::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers that received the line.
    pub delivered: usize,
    /// Subscribers whose queue was full.
    pub dropped: usize,
}

/// Registry of live subscribers plus the backend-wide shutdown signal.
#[derive(Debug)]
pub struct Broadcaster {
    registry: RwLock<Registry>,
    capacity: usize,
    shutdown_tx: watch::Sender<bool>,
}

impl Broadcaster {
    /// Create a broadcaster whose subscriber queues hold `capacity` lines.
    pub fn new(capacity: usize) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            capacity: capacity.max(1),
            shutdown_tx,
        })
    }

    /// Queue capacity given to each new subscriber.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new subscriber.
    ///
    /// Only lines published after this call are delivered. Fails with
    /// [`BridgeError::BackendClosed`] once the broadcaster is closed.
    pub fn subscribe(self: &Arc<Self>) -> Result<Subscription> {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if registry.closed {
            return Err(BridgeError::BackendClosed);
        }

        let id = registry.next_id;
        registry.next_id += 1;
        let (tx, rx) = mpsc::channel(self.capacity);
        registry.subscribers.insert(id, tx);
        debug!("Subscriber {} registered ({} active)", id, registry.subscribers.len());

        Ok(Subscription {
            id,
            receiver: rx,
            broadcaster: Arc::downgrade(self),
        })
    }

    /// Remove a subscriber and close its queue. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = registry.subscribers.remove(&id).is_some();
        if removed {
            debug!("Subscriber {} removed ({} active)", id, registry.subscribers.len());
        }
        removed
    }

    /// Offer `line` to every subscriber without blocking.
    pub fn publish(&self, line: &Bytes) -> Delivery {
        self.offer(Line::Complete(line.clone()))
    }

    /// Tell every subscriber a line of `size` bytes was dropped for length.
    pub fn publish_oversized(&self, size: usize) -> Delivery {
        self.offer(Line::Oversized { size })
    }

    fn offer(&self, line: Line) -> Delivery {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivery = Delivery::default();

        for (id, tx) in &registry.subscribers {
            match tx.try_send(line.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!("Subscriber {} queue full, dropping line", id);
                    delivery.dropped += 1;
                }
                // Receiver dropped; its Subscription is unregistering.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        delivery
    }

    /// Signal shutdown and close every subscriber queue. Idempotent.
    pub fn close(&self) {
        let first = self.shutdown_tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });

        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        registry.closed = true;
        let dropped = registry.subscribers.len();
        registry.subscribers.clear();

        if first {
            debug!("Broadcaster closed, released {} subscribers", dropped);
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// A receiver for the shutdown signal (`true` once closed).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Resolve once the broadcaster is closed.
    pub async fn closed(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }
}

/// A subscriber's view of the output stream.
///
/// Dropping the subscription unregisters it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Line>,
    broadcaster: Weak<Broadcaster>,
}

impl Subscription {
    /// Registry id of this subscriber.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next line, or `None` once the queue is closed and drained.
    /// Oversized markers are skipped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            if let Line::Complete(line) = self.receiver.recv().await? {
                return Some(line);
            }
        }
    }

    /// Next queue entry, oversized markers included.
    pub async fn recv_line(&mut self) -> Option<Line> {
        self.receiver.recv().await
    }

    /// Next buffered line without waiting. Oversized markers are skipped.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        loop {
            if let Line::Complete(line) = self.receiver.try_recv().ok()? {
                return Some(line);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.id);
        }
    }
}
