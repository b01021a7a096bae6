//! Error types for the bus and the shared store.

use relay_types::SignError;
use thiserror::Error;

/// Pub/sub failures.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus connection failed: {0}")]
    Connection(String),

    #[error("Publish to '{channel}' failed: {detail}")]
    Publish { channel: String, detail: String },

    #[error("Subscribe to '{channel}' failed: {detail}")]
    Subscribe { channel: String, detail: String },
}

/// Shared TTL store failures. All of them turn into a
/// `StoreUnavailable` rejection on the verification path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unreachable: {0}")]
    Unavailable(String),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Store round-trip timed out after {0} ms")]
    Timeout(u64),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

/// Producer-side failures of [`crate::SignedPublisher`].
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Sign(#[from] SignError),

    #[error(transparent)]
    Bus(#[from] BusError),
}
