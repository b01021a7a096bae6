//! # Shared Nonce Store
//!
//! A TTL key-value store with one operation that matters: an atomic
//! set-if-absent. Correctness across relay processes depends on the store
//! doing this in a single step; there is no client-side locking.

use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Atomic, TTL-bounded key claims.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Create `key` with the given TTL if and only if it does not exist.
    ///
    /// Returns `true` when this call created the key, `false` when it was
    /// already present.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Process-local store for tests and single-process deployments.
///
/// Expired keys are reclaimed lazily: a claim on an expired key succeeds,
/// and a sweep runs at most once per `gc_interval`.
pub struct InMemoryNonceStore {
    inner: Mutex<Inner>,
    gc_interval: Duration,
}

struct Inner {
    /// key -> expiry instant
    entries: HashMap<String, Instant>,
    last_gc: Instant,
}

impl InMemoryNonceStore {
    pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new() -> Self {
        Self::with_gc_interval(Self::DEFAULT_GC_INTERVAL)
    }

    #[must_use]
    pub fn with_gc_interval(gc_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                last_gc: Instant::now(),
            }),
            gc_interval,
        }
    }

    /// Keys currently held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn garbage_collect(inner: &mut Inner, now: Instant) {
        let before = inner.entries.len();
        inner.entries.retain(|_, expiry| *expiry > now);
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(removed, remaining = inner.entries.len(), "Nonce store GC");
        }
        inner.last_gc = now;
    }
}

impl Default for InMemoryNonceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if now.duration_since(inner.last_gc) >= self.gc_interval {
            Self::garbage_collect(&mut inner, now);
        }

        if let Some(expiry) = inner.entries.get(key) {
            if *expiry > now {
                return Ok(false);
            }
        }
        inner.entries.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// =============================================================================
// REDIS
// =============================================================================

/// Redis-backed store shared by the whole fleet.
///
/// Claims use `SET key 1 NX EX ttl`, a single atomic command.
#[derive(Clone)]
pub struct RedisNonceStore {
    conn: ConnectionManager,
}

impl RedisNonceStore {
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the URL is invalid or Redis is unreachable.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    #[must_use]
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl NonceStore for RedisNonceStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
