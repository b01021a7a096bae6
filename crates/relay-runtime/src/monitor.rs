//! Shared store connectivity probe.
//!
//! Only observes: envelopes that fail while the store is down are rejected
//! by the replay guard, never queued for later.

use relay_bus::NonceStore;
use relay_gateway::StoreHealth;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Probe the store every `interval` until shutdown.
pub async fn run_store_monitor(
    store: Arc<dyn NonceStore>,
    health: StoreHealth,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                probe(store.as_ref(), &health, timeout).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Store monitor stopping");
                    break;
                }
            }
        }
    }
}

/// One probe. Returns whether the store answered.
pub async fn probe(store: &dyn NonceStore, health: &StoreHealth, timeout: Duration) -> bool {
    let result = match tokio::time::timeout(timeout, store.ping()).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("no answer within {}ms", timeout.as_millis())),
    };

    let up = result.is_ok();
    let was_up = health.set_up(up);
    match (was_up, result) {
        (true, Err(e)) => error!(error = %e, "Shared nonce store unreachable; envelopes will be rejected"),
        (false, Ok(())) => info!("Shared nonce store reachable again"),
        _ => {}
    }
    up
}
