//! # Message Bus
//!
//! The cross-process pub/sub primitive every relay process subscribes to.

use crate::errors::BusError;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Raw payloads delivered on a channel, in bus order.
pub type BusStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Publish/subscribe over named channels.
///
/// Delivery is best-effort: no acknowledgement, no redelivery.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one payload. Returns the number of subscribers reached, where
    /// the backend reports it.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BusError>;

    /// Subscribe to a channel. The stream ends when the bus shuts down.
    async fn subscribe(&self, channel: &str) -> Result<BusStream, BusError>;
}

/// In-process bus over `tokio::sync::broadcast`, one sender per channel.
///
/// Several relays sharing one `InMemoryBus` behave like a fleet sharing a
/// Redis instance.
pub struct InMemoryBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
    events_published: AtomicU64,
    capacity: usize,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        if let Some(sender) = self.channels.read().get(channel) {
            return sender.clone();
        }
        self.channels
            .write()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Live subscribers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Total publish attempts, including ones nobody received.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BusError> {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender(channel).send(payload) {
            Ok(receivers) => {
                debug!(channel, receivers, "Payload published");
                Ok(receivers)
            }
            Err(_) => {
                warn!(channel, "Payload dropped (no subscribers)");
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<BusStream, BusError> {
        let receiver = self.sender(channel).subscribe();
        let channel_name = channel.to_string();
        debug!(channel, "New bus subscription");

        let stream = BroadcastStream::new(receiver).filter_map(move |item| match item {
            Ok(payload) => Some(payload),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(channel = %channel_name, skipped, "Subscriber lagged, payloads lost");
                None
            }
        });
        Ok(Box::pin(stream))
    }
}
