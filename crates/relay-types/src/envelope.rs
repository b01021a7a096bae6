//! # Envelopes
//!
//! The signed wire form of an [`Event`] and its parsed inbound counterpart.
//!
//! ## Wire Format
//!
//! One JSON object per bus message:
//!
//! ```text
//! { "eventType": "...", <event fields>, "nonce": "<hex>", "eventTime": <unix secs>, "signature": "<hex>" }
//! ```
//!
//! The signed set is the whole object minus `signature` and minus the
//! fields in [`UNSIGNED_FIELDS`], which may be attached after signing.

use crate::canonical::canonical_bytes;
use crate::errors::{Rejection, SignError};
use crate::event::Event;
use serde_json::{Map, Value};

pub const NONCE_FIELD: &str = "nonce";
pub const EVENT_TIME_FIELD: &str = "eventTime";
pub const SIGNATURE_FIELD: &str = "signature";

/// Envelope-level fields stripped before an event reaches clients.
pub const SECURITY_FIELDS: &[&str] = &[NONCE_FIELD, EVENT_TIME_FIELD, SIGNATURE_FIELD];

/// Fields that may be added after signing and never participate in the
/// signature (denormalized sender display info).
///
/// Anything on the bus path can rewrite these. Clients must treat
/// `senderInfo` as display data only and never as proof of who sent an
/// event; the signed `senderId` is the authenticated identity.
pub const UNSIGNED_FIELDS: &[&str] = &["senderInfo"];

/// The subset of a wire object covered by the signature.
#[must_use]
pub fn signed_fields(wire: &Map<String, Value>) -> Map<String, Value> {
    wire.iter()
        .filter(|(key, _)| key.as_str() != SIGNATURE_FIELD && !UNSIGNED_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// An event with its nonce, timestamp and signature, ready for the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedEnvelope {
    event: Event,
    nonce: String,
    event_time: i64,
    signature: String,
    attachments: Map<String, Value>,
}

impl SignedEnvelope {
    pub(crate) fn new(event: Event, nonce: String, event_time: i64, signature: String) -> Self {
        Self {
            event,
            nonce,
            event_time,
            signature,
            attachments: Map::new(),
        }
    }

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

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Add a field after signing.
    ///
    /// # Errors
    ///
    /// [`SignError::SignedFieldAttachment`] unless `field` is listed in
    /// [`UNSIGNED_FIELDS`]; the signature is never re-derived.
    pub fn attach(&mut self, field: &str, value: Value) -> Result<(), SignError> {
        if !UNSIGNED_FIELDS.contains(&field) {
            return Err(SignError::SignedFieldAttachment {
                field: field.to_string(),
            });
        }
        self.attachments.insert(field.to_string(), value);
        Ok(())
    }

    /// The complete wire object.
    #[must_use]
    pub fn to_wire(&self) -> Map<String, Value> {
        let mut wire = self.event.to_fields();
        wire.insert(NONCE_FIELD.to_string(), Value::String(self.nonce.clone()));
        wire.insert(EVENT_TIME_FIELD.to_string(), Value::from(self.event_time));
        wire.insert(
            SIGNATURE_FIELD.to_string(),
            Value::String(self.signature.clone()),
        );
        for (key, value) in &self.attachments {
            wire.insert(key.clone(), value.clone());
        }
        wire
    }

    /// # Errors
    ///
    /// [`SignError::Encode`] if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, SignError> {
        Ok(serde_json::to_vec(&Value::Object(self.to_wire()))?)
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// A bus message that passed the structural checks but not yet freshness,
/// replay or signature checks.
///
/// Only the security fields are inspected here. The event itself (type tag,
/// routing, notify list) is interpreted by [`InboundEnvelope::into_event`]
/// once the signature is known to be good, so a tampered routing field is
/// reported as a signature failure rather than a shape error.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    wire: Map<String, Value>,
    nonce: String,
    event_time: i64,
    signature: String,
}

impl InboundEnvelope {
    /// Parse raw bus bytes.
    ///
    /// # Errors
    ///
    /// [`Rejection::MalformedEnvelope`] when the bytes are not a JSON object
    /// or when `nonce`, `eventTime` or `signature` is missing or mistyped.
    pub fn parse(raw: &[u8]) -> Result<Self, Rejection> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| Rejection::malformed(format!("invalid JSON: {e}")))?;
        let Value::Object(wire) = value else {
            return Err(Rejection::malformed("envelope is not a JSON object"));
        };
        Self::from_wire(wire)
    }

    /// # Errors
    ///
    /// Same as [`InboundEnvelope::parse`].
    pub fn from_wire(wire: Map<String, Value>) -> Result<Self, Rejection> {
        let nonce = match wire.get(NONCE_FIELD) {
            Some(Value::String(n)) if !n.is_empty() => n.clone(),
            Some(_) => return Err(Rejection::malformed("nonce must be a non-empty string")),
            None => return Err(Rejection::malformed("missing nonce")),
        };
        let event_time = match wire.get(EVENT_TIME_FIELD) {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| Rejection::malformed("eventTime must be an integer"))?,
            Some(_) => return Err(Rejection::malformed("eventTime must be an integer")),
            None => return Err(Rejection::malformed("missing eventTime")),
        };
        let signature = match wire.get(SIGNATURE_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(_) => return Err(Rejection::malformed("signature must be a non-empty string")),
            None => return Err(Rejection::malformed("missing signature")),
        };

        Ok(Self {
            wire,
            nonce,
            event_time,
            signature,
        })
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    #[must_use]
    pub fn event_time(&self) -> i64 {
        self.event_time
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// The received wire object, untouched.
    #[must_use]
    pub fn wire(&self) -> &Map<String, Value> {
        &self.wire
    }

    /// Canonical bytes of the signed set, recomputed from what was received.
    #[must_use]
    pub fn signed_bytes(&self) -> Vec<u8> {
        canonical_bytes(&signed_fields(&self.wire))
    }

    /// Unsigned attachments that arrived with the envelope.
    #[must_use]
    pub fn attachments(&self) -> Map<String, Value> {
        self.wire
            .iter()
            .filter(|(key, _)| UNSIGNED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Interpret the non-security fields as an [`Event`], returning it with
    /// the nonce and event time. Call only after the signature has checked out.
    ///
    /// # Errors
    ///
    /// [`Rejection::MalformedEnvelope`] when the type tag or a routing field
    /// has the wrong shape.
    pub fn into_event(self) -> Result<(Event, String, i64), Rejection> {
        let fields: Map<String, Value> = self
            .wire
            .into_iter()
            .filter(|(key, _)| !SECURITY_FIELDS.contains(&key.as_str()))
            .collect();
        Ok((Event::from_fields(fields)?, self.nonce, self.event_time))
    }
}
