//! # Signed Publisher
//!
//! What the API tier links against: sign an [`Event`] and put it on the bus.

use crate::bus::MessageBus;
use crate::errors::PublishError;
use bytes::Bytes;
use relay_types::{Event, SignedEnvelope, Signer};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct SignedPublisher {
    signer: Signer,
    bus: Arc<dyn MessageBus>,
    channel: String,
}

impl SignedPublisher {
    pub fn new(signer: Signer, bus: Arc<dyn MessageBus>, channel: impl Into<String>) -> Self {
        Self {
            signer,
            bus,
            channel: channel.into(),
        }
    }

    /// Sign with a fresh nonce and publish. Returns the envelope that went
    /// out, e.g. for logging its nonce.
    ///
    /// # Errors
    ///
    /// [`PublishError`] if encoding or the bus fails.
    pub async fn publish(&self, event: Event) -> Result<SignedEnvelope, PublishError> {
        let envelope = self.signer.sign(event);
        self.publish_envelope(&envelope).await?;
        Ok(envelope)
    }

    /// Publish an already signed envelope, unsigned attachments included.
    ///
    /// # Errors
    ///
    /// [`PublishError`] if encoding or the bus fails.
    pub async fn publish_envelope(&self, envelope: &SignedEnvelope) -> Result<usize, PublishError> {
        let payload = Bytes::from(envelope.to_json_bytes()?);
        let receivers = self.bus.publish(&self.channel, payload).await?;
        debug!(
            channel = %self.channel,
            event_type = %envelope.event().event_type(),
            nonce = envelope.nonce(),
            receivers,
            "Signed envelope published"
        );
        Ok(receivers)
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}
