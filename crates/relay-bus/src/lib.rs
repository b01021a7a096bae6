//! # Relay Bus
//!
//! Everything between the producer's `publish` call and a verified event
//! inside a relay process.
//!
//! ```text
//! ┌──────────────┐  SignedPublisher   ┌──────────────┐   subscribe()   ┌──────────────┐
//! │ API process  │ ─────────────────► │  MessageBus  │ ──────────────► │ relay process│
//! └──────────────┘                    └──────────────┘                 │   Verifier   │
//!                                                                      │      │       │
//!                                                                      │ ReplayGuard  │
//!                                                                      └──────┼───────┘
//!                                                                             ▼
//!                                                                      ┌──────────────┐
//!                                                                      │  NonceStore  │
//!                                                                      │ (shared TTL) │
//!                                                                      └──────────────┘
//! ```
//!
//! The bus and the store are traits with an in-memory implementation for
//! tests and single-process use, and a Redis implementation for a fleet.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod errors;
pub mod nonce_store;
pub mod publisher;
pub mod redis_bus;
pub mod replay_guard;
pub mod verifier;

pub use bus::{BusStream, InMemoryBus, MessageBus};
pub use errors::{BusError, PublishError, StoreError};
pub use nonce_store::{InMemoryNonceStore, NonceStore, RedisNonceStore};
pub use publisher::SignedPublisher;
pub use redis_bus::RedisBus;
pub use replay_guard::ReplayGuard;
pub use verifier::{VerifiedEnvelope, Verifier};

/// Messages buffered per in-memory subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default bus channel carrying signed envelopes.
pub const DEFAULT_CHANNEL: &str = "mits_chat_event";

/// Default namespace of nonce keys in the shared store.
pub const DEFAULT_NONCE_NAMESPACE: &str = "chat";

/// Channel on which the relay that won a nonce claim forwards the envelope
/// to every relay, itself included.
#[must_use]
pub fn fanout_channel(channel: &str) -> String {
    format!("{channel}:fanout")
}
