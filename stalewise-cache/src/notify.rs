//! Invalidation notifiers.
//!
//! [`BroadcastInvalidator`] fans invalidations out to any number of
//! listeners over a tokio broadcast channel; each listener decides which
//! keys concern it.

use async_trait::async_trait;
use stalewise_core::Invalidator;
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of buffered events before slow listeners lag.
pub const DEFAULT_NOTIFY_CAPACITY: usize = 256;

/// Invalidation signal received by listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// These computed keys became stale.
    Keys(Vec<String>),
    /// Every key became stale.
    All,
}

impl InvalidationEvent {
    /// Does this event stale the given computed key.
    pub fn affects(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Keys(keys) => keys.iter().any(|candidate| candidate == key),
        }
    }
}

/// Invalidator publishing events on a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastInvalidator {
    tx: broadcast::Sender<InvalidationEvent>,
}

impl BroadcastInvalidator {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receive every future event.
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, event: InvalidationEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!(receivers, "Invalidation published"),
            // No listener is fine
            Err(_) => debug!("No receivers for invalidation"),
        }
    }
}

impl Default for BroadcastInvalidator {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_CAPACITY)
    }
}

#[async_trait]
impl Invalidator for BroadcastInvalidator {
    async fn invalidate(&self, keys: &[String]) {
        self.publish(InvalidationEvent::Keys(keys.to_vec()));
    }

    async fn invalidate_all(&self) {
        self.publish(InvalidationEvent::All);
    }
}
