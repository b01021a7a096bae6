//! Shared-store reachability as seen by this process.

use relay_telemetry::metrics::STORE_UP;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Written by the store monitor, read by `/health`. Mirrors `relay_store_up`.
#[derive(Debug, Clone)]
pub struct StoreHealth(Arc<AtomicBool>);

impl StoreHealth {
    /// Starts optimistic; the first probe corrects it.
    pub fn new() -> Self {
        STORE_UP.set(1.0);
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Record a probe result. Returns the previous state.
    pub fn set_up(&self, up: bool) -> bool {
        STORE_UP.set(if up { 1.0 } else { 0.0 });
        self.0.swap(up, Ordering::Relaxed)
    }

    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for StoreHealth {
    fn default() -> Self {
        Self::new()
    }
}
