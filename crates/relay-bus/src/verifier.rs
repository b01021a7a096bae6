//! # Envelope Verifier
//!
//! Checks run in a fixed order, each one a possible rejection:
//!
//! 1. structure: JSON object with `nonce`, `eventTime`, `signature`
//! 2. freshness: `|now - eventTime| <= max_skew`
//! 3. replay: atomic nonce claim in the shared store
//! 4. signature: constant-time HMAC comparison over the canonical form
//!
//! Event fields (type tag, routing, notify list) are interpreted only after
//! step 4, so tampering that breaks their shape is still `InvalidSignature`.
//!
//! Because the replay claim comes before the signature check, a replayed
//! envelope is reported as `ReplayDetected` even if it was also tampered
//! with. The store round-trip is the only suspension point.

use crate::replay_guard::ReplayGuard;
use relay_types::security::check_freshness;
use relay_types::{
    current_timestamp, Event, InboundEnvelope, Rejection, SigningKey, DEFAULT_MAX_SKEW_SECS,
};

/// An envelope that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedEnvelope {
    event: Event,
    nonce: String,
    event_time: i64,
}

impl VerifiedEnvelope {
    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    #[must_use]
    pub fn event_time(&self) -> i64 {
        self.event_time
    }
}

impl TryFrom<InboundEnvelope> for VerifiedEnvelope {
    type Error = Rejection;

    fn try_from(inbound: InboundEnvelope) -> Result<Self, Rejection> {
        let (event, nonce, event_time) = inbound.into_event()?;
        Ok(Self {
            event,
            nonce,
            event_time,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Verifier {
    key: SigningKey,
    guard: ReplayGuard,
    max_skew: u64,
}

impl Verifier {
    #[must_use]
    pub fn new(key: SigningKey, guard: ReplayGuard) -> Self {
        Self {
            key,
            guard,
            max_skew: DEFAULT_MAX_SKEW_SECS,
        }
    }

    #[must_use]
    pub fn with_max_skew(mut self, max_skew_secs: u64) -> Self {
        self.max_skew = max_skew_secs;
        self
    }

    #[must_use]
    pub fn guard(&self) -> &ReplayGuard {
        &self.guard
    }

    #[must_use]
    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    #[must_use]
    pub fn max_skew(&self) -> u64 {
        self.max_skew
    }

    /// Same key and skew, different replay guard.
    #[must_use]
    pub fn with_guard(&self, guard: ReplayGuard) -> Self {
        Self {
            key: self.key.clone(),
            guard,
            max_skew: self.max_skew,
        }
    }

    /// Verify raw bus bytes against the local clock.
    ///
    /// # Errors
    ///
    /// The first failing check's [`Rejection`].
    pub async fn verify(&self, raw: &[u8]) -> Result<VerifiedEnvelope, Rejection> {
        self.verify_at(raw, current_timestamp()).await
    }

    /// Verify raw bus bytes against an explicit `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// The first failing check's [`Rejection`].
    pub async fn verify_at(&self, raw: &[u8], now: i64) -> Result<VerifiedEnvelope, Rejection> {
        let inbound = InboundEnvelope::parse(raw)?;

        check_freshness(inbound.event_time(), now, self.max_skew)?;

        self.guard.check(inbound.nonce()).await?;

        if !self.key.verify(&inbound.signed_bytes(), inbound.signature()) {
            return Err(Rejection::InvalidSignature);
        }

        VerifiedEnvelope::try_from(inbound)
    }
}
