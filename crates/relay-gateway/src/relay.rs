//! # Relay
//!
//! Two subscriber loops per process:
//!
//! ```text
//!  producer channel ──► admit: verify (shared nonce claim) ──► fan-out channel
//!  fan-out channel  ──► deliver: verify (local dedupe) ──► Dispatcher
//! ```
//!
//! Every relay sees every envelope on the producer channel, but only the one
//! that wins the shared nonce claim forwards it. Every relay, the winner
//! included, receives the forwarded envelope and dispatches it to its own
//! connections. The forwarded bytes are the original signed envelope, so
//! the delivery stage checks signature and freshness again and only swaps
//! the shared claim for a process-local one.
//!
//! The delivery window is wider than the ingress window by the store timeout
//! plus one second. An envelope admitted at the edge of the window has
//! already claimed its nonce fleet-wide; without the margin the hop itself
//! could push it out of the window and no relay would deliver it.
//!
//! A rejection drops one envelope and never stops a loop.

use crate::dispatcher::{DispatchReport, Dispatcher};
use bytes::Bytes;
use futures::StreamExt;
use relay_bus::{
    BusError, BusStream, InMemoryNonceStore, MessageBus, ReplayGuard, VerifiedEnvelope, Verifier,
};
use relay_telemetry::metrics::{
    HistogramTimer, ENVELOPES_ACCEPTED, ENVELOPES_RECEIVED, ENVELOPES_REJECTED,
    VERIFICATION_DURATION,
};
use relay_types::Rejection;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const INGRESS: &str = "ingress";
const DELIVERY: &str = "delivery";

/// Namespace of the process-local delivery dedupe.
const DELIVERY_NAMESPACE: &str = "delivery";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// Verified and claimed, but the fan-out publish failed. The envelope is lost.
    #[error("Failed to forward verified envelope: {0}")]
    Forward(#[from] BusError),
}

#[derive(Clone)]
pub struct Relay {
    verifier: Verifier,
    delivery_verifier: Verifier,
    dispatcher: Dispatcher,
    bus: Arc<dyn MessageBus>,
    fanout_channel: String,
}

impl Relay {
    /// `verifier` claims nonces in the fleet-wide store. The delivery stage
    /// gets the same key with an in-process store.
    pub fn new(
        verifier: Verifier,
        dispatcher: Dispatcher,
        bus: Arc<dyn MessageBus>,
        fanout_channel: impl Into<String>,
    ) -> Self {
        let skew = delivery_skew(&verifier);
        // A future-dated envelope stays fresh for up to twice the skew.
        let dedupe_ttl = Duration::from_secs(skew * 2 + 1);
        let delivery_verifier = verifier
            .with_guard(
                ReplayGuard::new(Arc::new(InMemoryNonceStore::new()), DELIVERY_NAMESPACE)
                    .with_ttl(dedupe_ttl),
            )
            .with_max_skew(skew);
        Self {
            verifier,
            delivery_verifier,
            dispatcher,
            bus,
            fanout_channel: fanout_channel.into(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn fanout_channel(&self) -> &str {
        &self.fanout_channel
    }

    /// Verify one producer envelope and, if this process wins the nonce
    /// claim, forward it to the fan-out channel.
    ///
    /// # Errors
    ///
    /// [`RelayError`], already logged and counted.
    pub async fn admit(&self, raw: Bytes) -> Result<VerifiedEnvelope, RelayError> {
        ENVELOPES_RECEIVED.inc();

        let verified = {
            let _timer = HistogramTimer::new(&VERIFICATION_DURATION);
            self.verifier.verify(&raw).await
        };
        let verified = check_outcome(INGRESS, verified)?;

        match self.bus.publish(&self.fanout_channel, raw).await {
            Ok(relays) => {
                debug!(
                    event_type = %verified.event().event_type(),
                    nonce = verified.nonce(),
                    relays,
                    "Envelope forwarded for fan-out"
                );
                Ok(verified)
            }
            Err(e) => {
                error!(
                    event_type = %verified.event().event_type(),
                    nonce = verified.nonce(),
                    error = %e,
                    "Failed to forward verified envelope"
                );
                Err(e.into())
            }
        }
    }

    /// Verify one forwarded envelope and dispatch it to local connections.
    ///
    /// # Errors
    ///
    /// The [`Rejection`] that dropped the envelope, already logged and counted.
    pub async fn deliver(&self, raw: &[u8]) -> Result<DispatchReport, Rejection> {
        let verified = check_outcome(DELIVERY, self.delivery_verifier.verify(raw).await)?;
        Ok(self.dispatcher.dispatch(&verified))
    }

    /// Consume both streams until shutdown flips to true or a stream ends.
    pub async fn run(
        self,
        mut producer: BusStream,
        mut forwarded: BusStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(fanout_channel = %self.fanout_channel, "Relay subscriber loops started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Relay subscriber loops stopping");
                        break;
                    }
                }
                message = producer.next() => {
                    let Some(raw) = message else {
                        warn!("Producer stream ended");
                        break;
                    };
                    // Failures are already recorded.
                    let _ = self.admit(raw).await;
                }
                message = forwarded.next() => {
                    let Some(raw) = message else {
                        warn!("Fan-out stream ended");
                        break;
                    };
                    let _ = self.deliver(&raw).await;
                }
            }
        }
    }
}

/// Ingress skew plus the longest an admit can spend in the store, rounded
/// up, plus one second for the hop.
fn delivery_skew(ingress: &Verifier) -> u64 {
    let store_timeout = ingress.guard().timeout();
    let store_secs = store_timeout.as_secs() + u64::from(store_timeout.subsec_nanos() > 0);
    ingress.max_skew() + store_secs + 1
}

/// Verification result plus the event-type allow-list, logged and counted.
fn check_outcome(
    stage: &'static str,
    verified: Result<VerifiedEnvelope, Rejection>,
) -> Result<VerifiedEnvelope, Rejection> {
    let verified = match verified {
        Ok(verified) if !verified.event().event_type().is_known() => {
            Err(Rejection::UnknownEventType {
                event_type: verified.event().event_type().to_string(),
            })
        }
        other => other,
    };

    match verified {
        Ok(verified) => {
            ENVELOPES_ACCEPTED
                .with_label_values(&[stage, verified.event().event_type().as_str()])
                .inc();
            Ok(verified)
        }
        Err(rejection) => {
            ENVELOPES_REJECTED
                .with_label_values(&[stage, rejection.reason()])
                .inc();
            warn!(
                audit = "envelope_rejected",
                stage,
                reason = rejection.reason(),
                error = %rejection,
                "Envelope rejected"
            );
            Err(rejection)
        }
    }
}
