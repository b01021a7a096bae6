//! # Redis Bus
//!
//! [`MessageBus`] over Redis PUBLISH/SUBSCRIBE, shared by every producer and
//! relay process in a deployment.
//!
//! Publishing goes through a [`ConnectionManager`], which reconnects on its
//! own. Each subscription owns a dedicated pub/sub connection driven by a
//! background task that reconnects with exponential backoff when the stream
//! ends. Payloads published while a subscriber is reconnecting are lost;
//! there is no redelivery layer.

use crate::bus::{BusStream, MessageBus};
use crate::errors::BusError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Buffered payloads between the pub/sub task and the consumer.
const SUBSCRIBER_BUFFER: usize = 1024;

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

pub struct RedisBus {
    client: Client,
    publisher: ConnectionManager,
}

impl RedisBus {
    /// Open the client and establish the publishing connection.
    ///
    /// # Errors
    ///
    /// [`BusError::Connection`] if the URL is invalid or Redis is unreachable.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let publisher = client
            .get_connection_manager()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BusError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(channel, payload.as_ref())
            .await
            .map_err(|e| BusError::Publish {
                channel: channel.to_string(),
                detail: e.to_string(),
            })?;
        debug!(channel, receivers, "Payload published");
        Ok(usize::try_from(receivers).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<BusStream, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe {
                channel: channel.to_string(),
                detail: e.to_string(),
            })?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::Subscribe {
                channel: channel.to_string(),
                detail: e.to_string(),
            })?;
        info!(channel, "Subscribed to Redis channel");

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        tokio::spawn(forward_loop(
            self.client.clone(),
            channel.to_string(),
            pubsub,
            tx,
        ));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Pump one subscription into `tx`, reconnecting until the consumer goes away.
async fn forward_loop(
    client: Client,
    channel: String,
    first: redis::aio::PubSub,
    tx: mpsc::Sender<Bytes>,
) {
    let mut pubsub = Some(first);
    let mut delay = BACKOFF_INITIAL;

    loop {
        let current = match pubsub.take() {
            Some(current) => current,
            None => match resubscribe(&client, &channel).await {
                Ok(current) => {
                    info!(channel = %channel, "Redis subscription restored");
                    delay = BACKOFF_INITIAL;
                    current
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, retry_in_ms = delay.as_millis() as u64, "Redis resubscribe failed");
                    if wait_or_closed(&tx, delay).await {
                        return;
                    }
                    delay = (delay * 2).min(BACKOFF_MAX);
                    continue;
                }
            },
        };

        let messages = current.into_on_message();
        tokio::pin!(messages);
        while let Some(msg) = messages.next().await {
            let payload = Bytes::copy_from_slice(msg.get_payload_bytes());
            if tx.send(payload).await.is_err() {
                debug!(channel = %channel, "Bus consumer dropped, closing subscription");
                return;
            }
        }

        error!(channel = %channel, "Redis subscription stream ended");
        if wait_or_closed(&tx, delay).await {
            return;
        }
    }
}

async fn resubscribe(client: &Client, channel: &str) -> redis::RedisResult<redis::aio::PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Sleep for `delay`; true if the consumer went away meanwhile.
async fn wait_or_closed(tx: &mpsc::Sender<Bytes>, delay: Duration) -> bool {
    tokio::select! {
        () = tx.closed() => true,
        () = tokio::time::sleep(delay) => false,
    }
}
