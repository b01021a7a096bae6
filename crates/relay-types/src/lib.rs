//! # Relay Types Crate
//!
//! Everything a producer and a relay process must agree on byte-for-byte:
//! the event model, the canonical serialization, the HMAC-SHA256 signing
//! scheme and the rejection taxonomy.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: the signer and the verifier call the same
//!   [`canonical`] code, so both sides sign exactly the same bytes.
//! - **Closed event set**: event types are an enumeration with an explicit
//!   [`EventType::Unknown`] variant instead of a string allow-list.
//! - **No ambient state**: secrets are passed in as [`SharedSecret`] values.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod canonical;
pub mod envelope;
pub mod errors;
pub mod event;
pub mod security;

pub use canonical::{canonical_bytes, canonicalize};
pub use envelope::{
    signed_fields, InboundEnvelope, SignedEnvelope, EVENT_TIME_FIELD, NONCE_FIELD, SECURITY_FIELDS,
    SIGNATURE_FIELD, UNSIGNED_FIELDS,
};
pub use errors::{Rejection, SecretError, SignError};
pub use event::{Event, EventBuilder, EventType, GroupKey, Target};
pub use security::{
    check_freshness, current_timestamp, current_timestamp_millis, generate_nonce, SharedSecret,
    Signer, SigningKey,
};

/// Default freshness bound for `eventTime`, in seconds (symmetric).
pub const DEFAULT_MAX_SKEW_SECS: u64 = 60;

/// Default lifetime of a nonce record in the shared store, in seconds.
pub const DEFAULT_NONCE_TTL_SECS: u64 = 60;

/// Number of random bytes in a generated nonce (128 bits).
pub const NONCE_BYTES: usize = 16;
