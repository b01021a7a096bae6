//! # Relay Runtime
//!
//! Wires one relay process together.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration and resolve the shared secret
//! 2. Connect the bus and the nonce store
//! 3. Subscribe to the envelope and fan-out channels and start the relay loops
//! 4. Start the store health monitor
//! 5. Serve HTTP and WebSocket until shutdown
//!
//! ```text
//!  Redis pub/sub ──► Relay::admit ──► <channel>:fanout ──► Relay::deliver ──► sockets
//!                         │                                      │
//!  Redis SET NX  ◄────────┘                       MembershipRouter ◄── joinRoom / leaveRoom
//!  sockets ──► ws handler ──► SignedPublisher ──► Redis pub/sub
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod monitor;
pub mod secret;

pub use config::{ConfigError, RedisConfig, RelayConfig};
pub use secret::{resolve_secret, resolve_secret_with, SecretSource};

use anyhow::{Context, Result};
use axum::Router;
use parking_lot::Mutex;
use relay_bus::{
    MessageBus, NonceStore, RedisBus, RedisNonceStore, ReplayGuard, SignedPublisher, Verifier,
};
use relay_gateway::{build_router, Dispatcher, GatewayState, MembershipRouter, Relay, StoreHealth};
use relay_types::{SharedSecret, Signer, SigningKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long shutdown waits for background tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One relay process.
pub struct RelayRuntime {
    config: Arc<RelayConfig>,
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn NonceStore>,
    router: Arc<MembershipRouter>,
    store_health: StoreHealth,
    verifier: Verifier,
    publisher: SignedPublisher,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayRuntime {
    /// Connect to Redis for both the bus and the nonce store.
    ///
    /// # Errors
    ///
    /// Fails if Redis is unreachable at startup.
    pub async fn connect(config: RelayConfig, secret: &SharedSecret) -> Result<Self> {
        let url = config.redis.url();
        let bus = RedisBus::connect(&url)
            .await
            .context("Failed to connect the Redis bus")?;
        let store = RedisNonceStore::connect(&url)
            .await
            .context("Failed to connect the Redis nonce store")?;
        info!(
            host = %config.redis.host,
            port = config.redis.port,
            "Connected to Redis"
        );
        Self::with_backends(config, secret, Arc::new(bus), Arc::new(store))
    }

    /// Build over explicit backends, e.g. the in-memory ones.
    ///
    /// # Errors
    ///
    /// Fails if the secret is rejected as an HMAC key.
    pub fn with_backends(
        config: RelayConfig,
        secret: &SharedSecret,
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn NonceStore>,
    ) -> Result<Self> {
        let key = SigningKey::new(secret).context("Invalid shared secret")?;
        let guard = ReplayGuard::new(store.clone(), config.nonce_namespace.clone())
            .with_ttl(config.nonce_ttl)
            .with_timeout(config.store_timeout);
        let verifier = Verifier::new(key.clone(), guard).with_max_skew(config.max_skew_secs);
        let publisher = SignedPublisher::new(Signer::from_key(key), bus.clone(), config.channel.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            bus,
            store,
            router: Arc::new(MembershipRouter::new()),
            store_health: StoreHealth::new(),
            verifier,
            publisher,
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn membership(&self) -> &Arc<MembershipRouter> {
        &self.router
    }

    pub fn publisher(&self) -> &SignedPublisher {
        &self.publisher
    }

    pub fn store_health(&self) -> &StoreHealth {
        &self.store_health
    }

    /// Resolves once shutdown has been requested.
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_rx.clone();
        async move {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    /// Subscribe, spawn the background tasks and return the HTTP router.
    ///
    /// # Errors
    ///
    /// Fails if the channel subscription cannot be established.
    pub async fn start(&self) -> Result<Router> {
        // Fan-out first, so nothing this relay forwards can miss itself.
        let forwarded = self
            .bus
            .subscribe(&self.config.fanout_channel)
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.config.fanout_channel))?;
        let producer = self
            .bus
            .subscribe(&self.config.channel)
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.config.channel))?;

        let relay = Relay::new(
            self.verifier.clone(),
            Dispatcher::new(self.router.clone()),
            self.bus.clone(),
            self.config.fanout_channel.clone(),
        );
        let subscriber = tokio::spawn(relay.run(producer, forwarded, self.shutdown_rx.clone()));

        let monitor = tokio::spawn(monitor::run_store_monitor(
            self.store.clone(),
            self.store_health.clone(),
            self.config.store_health_interval,
            self.config.store_timeout,
            self.shutdown_rx.clone(),
        ));

        self.tasks.lock().extend([subscriber, monitor]);

        info!(
            channel = %self.config.channel,
            fanout_channel = %self.config.fanout_channel,
            namespace = %self.config.nonce_namespace,
            max_skew_secs = self.config.max_skew_secs,
            "Relay started"
        );

        Ok(build_router(GatewayState {
            router: self.router.clone(),
            publisher: self.publisher.clone(),
            ws_config: self.config.websocket.clone(),
            store_health: self.store_health.clone(),
        }))
    }

    /// Signal every task to stop and wait for them, up to a grace period.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!(error = %e, "Failed to send shutdown signal");
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Background task failed"),
                Err(_) => warn!("Background task did not stop in time"),
            }
        }

        info!("Shutdown complete");
    }
}
