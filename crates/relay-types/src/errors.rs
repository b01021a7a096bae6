//! # Error Types
//!
//! Rejection reasons for inbound envelopes plus the producer-side errors.

use thiserror::Error;

/// Why a relay process dropped an envelope.
///
/// Every variant is a local, non-fatal outcome: the envelope is dropped,
/// the reason is recorded, and the subscriber loop moves on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    /// Not a JSON object, or `nonce`/`eventTime`/`signature`/`eventType` missing or mistyped.
    #[error("Malformed envelope: {detail}")]
    MalformedEnvelope { detail: String },

    /// `eventTime` is further than the allowed skew from local time, in either direction.
    #[error("Timestamp {event_time} outside freshness window (now {now}, max skew {max_skew}s)")]
    StaleOrFutureTimestamp {
        event_time: i64,
        now: i64,
        max_skew: u64,
    },

    /// The nonce was already claimed in the shared store.
    #[error("Replay detected: nonce {nonce} already used")]
    ReplayDetected { nonce: String },

    /// Signature does not match the canonical form under the shared secret.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The replay check could not complete (store error or timeout).
    #[error("Nonce store unavailable: {detail}")]
    StoreUnavailable { detail: String },

    /// The envelope verified but names an event type this relay does not handle.
    #[error("Unknown event type: {event_type}")]
    UnknownEventType { event_type: String },
}

impl Rejection {
    /// Create a malformed-envelope rejection.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            detail: detail.into(),
        }
    }

    /// Stable label used for audit logs and metric labels.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::StaleOrFutureTimestamp { .. } => "stale_or_future_timestamp",
            Self::ReplayDetected { .. } => "replay_detected",
            Self::InvalidSignature => "invalid_signature",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::UnknownEventType { .. } => "unknown_event_type",
        }
    }
}

/// Errors constructing a shared secret.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretError {
    /// The secret is empty or only whitespace.
    #[error("Shared secret is empty")]
    Empty,

    /// The HMAC implementation refused the key.
    #[error("Shared secret rejected as HMAC key")]
    InvalidKey,
}

/// Producer-side errors.
#[derive(Debug, Error)]
pub enum SignError {
    /// A field may only be attached after signing if it is listed as unsigned.
    #[error("Field '{field}' is part of the signed set and cannot be attached after signing")]
    SignedFieldAttachment { field: String },

    /// The envelope could not be encoded for the bus.
    #[error("Envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
