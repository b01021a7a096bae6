//! # Signing Primitives
//!
//! HMAC-SHA256 over the canonical form, keyed by a pre-shared secret that
//! every producer and relay process must agree on.
//!
//! ## Security Properties
//!
//! - **Constant-time comparison**: verification goes through
//!   [`Mac::verify_slice`], never `==` on hex strings.
//! - **Fresh nonces**: 128 bits from the OS RNG per envelope.
//! - **Symmetric freshness**: an `eventTime` too far in the past or the
//!   future is rejected the same way.

use crate::canonical::canonical_bytes;
use crate::envelope::{signed_fields, SignedEnvelope, EVENT_TIME_FIELD, NONCE_FIELD};
use crate::errors::{Rejection, SecretError};
use crate::event::Event;
use crate::NONCE_BYTES;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Bytes of entropy in a generated secret.
pub const SECRET_BYTES: usize = 32;

// =============================================================================
// SHARED SECRET
// =============================================================================

/// The pre-shared signing secret.
///
/// The UTF-8 bytes of the string are the HMAC key, so a hex secret produced
/// by [`SharedSecret::generate`] is used as text, not decoded.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// # Errors
    ///
    /// [`SecretError::Empty`] for an empty or whitespace-only secret.
    pub fn new(secret: impl Into<String>) -> Result<Self, SecretError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(SecretError::Empty);
        }
        Ok(Self(secret))
    }

    /// A fresh random secret, hex-encoded.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// The secret text. Only for persisting a generated secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

// =============================================================================
// SIGNING KEY
// =============================================================================

/// An HMAC-SHA256 instance keyed once and cloned per operation.
#[derive(Clone)]
pub struct SigningKey {
    mac: HmacSha256,
}

impl SigningKey {
    /// # Errors
    ///
    /// [`SecretError::InvalidKey`] if the HMAC implementation refuses the key.
    pub fn new(secret: &SharedSecret) -> Result<Self, SecretError> {
        let mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SecretError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Lowercase hex HMAC-SHA256 of `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature. Non-hex input never matches.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(message);
        mac.verify_slice(&signature).is_ok()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

// =============================================================================
// SIGNER
// =============================================================================

/// Producer side: turns an [`Event`] into a [`SignedEnvelope`].
///
/// Never touches the replay store.
#[derive(Debug, Clone)]
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    /// # Errors
    ///
    /// Propagates [`SecretError`] from key construction.
    pub fn new(secret: &SharedSecret) -> Result<Self, SecretError> {
        Ok(Self::from_key(SigningKey::new(secret)?))
    }

    #[must_use]
    pub fn from_key(key: SigningKey) -> Self {
        Self { key }
    }

    /// Sign with a fresh nonce and the current time.
    #[must_use]
    pub fn sign(&self, event: Event) -> SignedEnvelope {
        self.sign_at(event, current_timestamp(), generate_nonce())
    }

    /// Sign with an explicit timestamp and nonce.
    ///
    /// `nonce` and `eventTime` are added before the signature is computed so
    /// both participate in the signed canonical form.
    #[must_use]
    pub fn sign_at(&self, event: Event, event_time: i64, nonce: String) -> SignedEnvelope {
        let mut wire = event.to_fields();
        wire.insert(NONCE_FIELD.to_string(), Value::String(nonce.clone()));
        wire.insert(EVENT_TIME_FIELD.to_string(), Value::from(event_time));

        let signature = self.key.sign(&canonical_bytes(&signed_fields(&wire)));
        SignedEnvelope::new(event, nonce, event_time, signature)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Hex nonce of [`NONCE_BYTES`] random bytes.
#[must_use]
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Current Unix time in seconds.
#[must_use]
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// `|now - event_time| <= max_skew`, in both directions.
///
/// # Errors
///
/// [`Rejection::StaleOrFutureTimestamp`] when outside the window.
pub fn check_freshness(event_time: i64, now: i64, max_skew: u64) -> Result<(), Rejection> {
    if now.saturating_sub(event_time).unsigned_abs() <= max_skew {
        Ok(())
    } else {
        Err(Rejection::StaleOrFutureTimestamp {
            event_time,
            now,
            max_skew,
        })
    }
}
