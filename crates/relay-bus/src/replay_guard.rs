//! # Replay Guard
//!
//! Accepts each nonce at most once per TTL window, fleet-wide.
//!
//! The claim is a single set-if-absent round-trip under a timeout. A store
//! error or a timeout is a rejection, never an implicit accept.

use crate::nonce_store::NonceStore;
use relay_types::{Rejection, DEFAULT_NONCE_TTL_SECS};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default bound on the store round-trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct ReplayGuard {
    store: Arc<dyn NonceStore>,
    namespace: String,
    ttl: Duration,
    timeout: Duration,
}

impl ReplayGuard {
    pub fn new(store: Arc<dyn NonceStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            ttl: Duration::from_secs(DEFAULT_NONCE_TTL_SECS),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Store key for a nonce: `<namespace>:nonce:<nonce>`.
    #[must_use]
    pub fn key_for(&self, nonce: &str) -> String {
        format!("{}:nonce:{}", self.namespace, nonce)
    }

    /// Claim a nonce.
    ///
    /// # Errors
    ///
    /// - [`Rejection::ReplayDetected`] if the nonce is already claimed
    /// - [`Rejection::StoreUnavailable`] on store error or timeout
    pub async fn check(&self, nonce: &str) -> Result<(), Rejection> {
        let key = self.key_for(nonce);
        let claim = tokio::time::timeout(self.timeout, self.store.set_if_absent(&key, self.ttl)).await;

        match claim {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(Rejection::ReplayDetected {
                nonce: nonce.to_string(),
            }),
            Ok(Err(e)) => {
                warn!(error = %e, "Replay check failed");
                Err(Rejection::StoreUnavailable {
                    detail: e.to_string(),
                })
            }
            Err(_) => {
                let millis = self.timeout.as_millis() as u64;
                warn!(timeout_ms = millis, "Replay check timed out");
                Err(Rejection::StoreUnavailable {
                    detail: format!("timed out after {millis} ms"),
                })
            }
        }
    }

    /// The backing store, for health probes.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn NonceStore> {
        &self.store
    }
}

impl std::fmt::Debug for ReplayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayGuard")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
