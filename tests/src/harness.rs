//! # Relay Fleet Harness
//!
//! Several relay processes in one test: each node has its own membership
//! table and relay loops, and all of them share one in-memory bus and one
//! nonce store, the way a deployment shares Redis.
//!
//! Clients are driven through [`ConnectionSession`], so joins and typing
//! take the same path as a real socket without the HTTP upgrade.

use async_trait::async_trait;
use bytes::Bytes;
use relay_bus::{
    fanout_channel, InMemoryBus, InMemoryNonceStore, MessageBus, NonceStore, ReplayGuard,
    SignedPublisher, StoreError, Verifier,
};
use relay_gateway::{
    ConnectionSession, Dispatcher, MembershipRouter, OutboundFrame, Relay, WebSocketConfig,
};
use relay_types::{Event, SharedSecret, SignedEnvelope, Signer, SigningKey};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const CHANNEL: &str = "relay_test_event";
pub const NAMESPACE: &str = "chat";
pub const SECRET: &str = "fleet-shared-secret";

/// How long a client waits for a frame it expects.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Long enough for both bus hops to drain when nothing is expected.
pub const SETTLE: Duration = Duration::from_millis(100);

pub fn secret() -> SharedSecret {
    SharedSecret::new(SECRET).expect("static secret is non-empty")
}

// =============================================================================
// NONCE STORE WITH AN OUTAGE SWITCH
// =============================================================================

/// In-memory store that can be taken offline.
pub struct SwitchableStore {
    inner: InMemoryNonceStore,
    up: AtomicBool,
    claims: AtomicUsize,
}

impl SwitchableStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryNonceStore::new(),
            up: AtomicBool::new(true),
            claims: AtomicUsize::new(0),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    /// Successful first-time claims so far.
    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }
}

impl Default for SwitchableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NonceStore for SwitchableStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_up()?;
        let claimed = self.inner.set_if_absent(key, ttl).await?;
        if claimed {
            self.claims.fetch_add(1, Ordering::SeqCst);
        }
        Ok(claimed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_up()
    }
}

// =============================================================================
// CLIENTS
// =============================================================================

/// One connected socket.
pub struct TestClient {
    session: ConnectionSession,
    rx: mpsc::Receiver<OutboundFrame>,
}

impl TestClient {
    /// Send one client message and return the direct reply, if any.
    pub async fn send(&mut self, event: &str, data: Value) -> Option<OutboundFrame> {
        let text = json!({ "event": event, "data": data }).to_string();
        self.session.handle_text(&text).await
    }

    pub async fn join(&mut self, room: &str) {
        let reply = self
            .send("joinRoom", json!({ "chatRoomId": room }))
            .await
            .expect("joinRoom is acknowledged");
        assert_eq!(reply.event_name().as_deref(), Some("joinedRoom"));
    }

    pub async fn leave(&mut self, room: &str) {
        self.send("leaveRoom", json!({ "chatRoomId": room })).await;
    }

    /// Next frame, failing the test if none arrives in time.
    pub async fn recv(&mut self) -> OutboundFrame {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("no frame within timeout")
            .expect("outbound queue closed")
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.user_id()
    }
}

// =============================================================================
// FLEET
// =============================================================================

/// One relay process.
pub struct RelayNode {
    router: Arc<MembershipRouter>,
    publisher: SignedPublisher,
}

impl RelayNode {
    pub fn connect(&self, user_id: Option<&str>) -> TestClient {
        let (session, rx) = ConnectionSession::open(
            self.router.clone(),
            self.publisher.clone(),
            WebSocketConfig::default(),
            user_id.map(str::to_string),
        );
        TestClient { session, rx }
    }

    pub fn membership(&self) -> &Arc<MembershipRouter> {
        &self.router
    }
}

pub struct Fleet {
    bus: Arc<InMemoryBus>,
    store: Arc<SwitchableStore>,
    signer: Signer,
    nodes: Vec<RelayNode>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Fleet {
    /// Start `relays` relay processes and wait until all are subscribed.
    pub async fn start(relays: usize) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let store = Arc::new(SwitchableStore::new());
        let key = SigningKey::new(&secret()).expect("valid key");
        let (shutdown, shutdown_rx) = watch::channel(false);
        let fanout = fanout_channel(CHANNEL);

        let mut nodes = Vec::with_capacity(relays);
        let mut tasks = Vec::with_capacity(relays);
        for _ in 0..relays {
            let router = Arc::new(MembershipRouter::new());
            let verifier = Verifier::new(key.clone(), ReplayGuard::new(store.clone(), NAMESPACE));
            let relay = Relay::new(
                verifier,
                Dispatcher::new(router.clone()),
                bus.clone(),
                fanout.clone(),
            );
            let forwarded = bus.subscribe(&fanout).await.expect("subscribe fan-out");
            let producer = bus.subscribe(CHANNEL).await.expect("subscribe producer");
            tasks.push(tokio::spawn(relay.run(producer, forwarded, shutdown_rx.clone())));

            let publisher =
                SignedPublisher::new(Signer::from_key(key.clone()), bus.clone(), CHANNEL);
            nodes.push(RelayNode { router, publisher });
        }

        Self {
            bus,
            store,
            signer: Signer::from_key(key),
            nodes,
            shutdown,
            tasks,
        }
    }

    pub fn node(&self, index: usize) -> &RelayNode {
        &self.nodes[index]
    }

    pub fn store(&self) -> &SwitchableStore {
        &self.store
    }

    pub fn bus(&self) -> &InMemoryBus {
        &self.bus
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Sign and publish as an application server would.
    pub async fn publish(&self, event: Event) -> SignedEnvelope {
        let envelope = self.signer.sign(event);
        self.publish_envelope(&envelope).await;
        envelope
    }

    pub async fn publish_envelope(&self, envelope: &SignedEnvelope) {
        let raw = envelope.to_json_bytes().expect("serializable envelope");
        self.publish_raw(raw).await;
    }

    /// Publish arbitrary bytes on the producer channel.
    pub async fn publish_raw(&self, raw: impl Into<Bytes>) {
        self.bus
            .publish(CHANNEL, raw.into())
            .await
            .expect("in-memory publish");
    }

    /// Publish a hand-edited wire object.
    pub async fn publish_wire(&self, wire: &Value) {
        self.publish_raw(serde_json::to_vec(wire).expect("serializable wire")).await;
    }

    /// Give both hops time to finish.
    pub async fn settle(&self) {
        tokio::time::sleep(SETTLE).await;
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }
}

/// Wire form of a signed envelope as a mutable JSON value.
pub fn wire(envelope: &SignedEnvelope) -> Value {
    Value::Object(envelope.to_wire())
}
