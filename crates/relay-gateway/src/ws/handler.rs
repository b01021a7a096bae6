//! WebSocket connection handling.
//!
//! Security features:
//! - Message size limits (default 64KiB)
//! - Rate limiting per connection
//! - Idle timeout
//!
//! Each socket gets a writer task draining its outbound queue and a reader
//! loop feeding a [`ConnectionSession`]. The session owns the membership
//! registration and removes it when dropped.

use super::protocol::ClientMessage;
use crate::connection::{ConnectionId, OutboundFrame};
use crate::membership::MembershipRouter;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use relay_bus::SignedPublisher;
use relay_telemetry::metrics::CONNECTIONS_ACTIVE;
use relay_types::{Event, EventType, GroupKey};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default maximum inbound message size (64KiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default rate limit (50 control messages per second)
pub const DEFAULT_RATE_LIMIT: u32 = 50;

/// Default per-connection outbound queue depth
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
    /// Rate limit (messages per second per connection)
    pub rate_limit: u32,
    /// Outbound queue depth; frames beyond it are dropped
    pub outbound_buffer: usize,
    pub ping_interval: Duration,
    /// Idle timeout (disconnect if nothing arrives)
    pub idle_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            rate_limit: DEFAULT_RATE_LIMIT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            ping_interval: DEFAULT_PING_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// One client connection's state, independent of the transport.
pub struct ConnectionSession {
    connection_id: ConnectionId,
    user_id: Option<String>,
    router: Arc<MembershipRouter>,
    publisher: SignedPublisher,
    config: WebSocketConfig,
    /// This connection's own handle on its outbound queue
    outbound: mpsc::Sender<OutboundFrame>,
    /// Message counter for rate limiting
    message_count: u32,
    /// Rate limit window start
    rate_limit_window: Instant,
}

impl ConnectionSession {
    /// Register a new connection and return it with its outbound queue.
    pub fn open(
        router: Arc<MembershipRouter>,
        publisher: SignedPublisher,
        config: WebSocketConfig,
        user_id: Option<String>,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let connection_id = ConnectionId::new();
        let user_id = user_id.filter(|id| !id.is_empty());
        let (tx, rx) = mpsc::channel(config.outbound_buffer.max(1));
        router.register(connection_id, user_id.clone(), tx.clone());
        CONNECTIONS_ACTIVE.inc();

        match &user_id {
            Some(user_id) => info!(connection_id = %connection_id, user_id = %user_id, "User connected"),
            None => info!(connection_id = %connection_id, "Client connected without userId"),
        }

        (
            Self {
                connection_id,
                user_id,
                router,
                publisher,
                config,
                outbound: tx,
                message_count: 0,
                rate_limit_window: Instant::now(),
            },
            rx,
        )
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Queue a reply behind whatever fan-out frames are already waiting for
    /// this connection. Returns false once the writer has gone away.
    pub async fn reply(&self, frame: OutboundFrame) -> bool {
        self.outbound.send(frame).await.is_ok()
    }

    /// Check rate limit, returns true if the message is allowed
    fn check_rate_limit(&mut self) -> bool {
        let now = Instant::now();

        // Reset window every second
        if now.duration_since(self.rate_limit_window) >= Duration::from_secs(1) {
            self.rate_limit_window = now;
            self.message_count = 0;
        }

        self.message_count += 1;
        self.message_count <= self.config.rate_limit
    }

    /// Handle one inbound text frame. Returns the reply for this client, if any.
    pub async fn handle_text(&mut self, text: &str) -> Option<OutboundFrame> {
        if text.len() > self.config.max_message_size {
            warn!(
                connection_id = %self.connection_id,
                size = text.len(),
                max = self.config.max_message_size,
                "Message exceeds size limit"
            );
            return Some(OutboundFrame::error(&format!(
                "Message too large: {} bytes (max: {})",
                text.len(),
                self.config.max_message_size
            )));
        }

        if !self.check_rate_limit() {
            return Some(OutboundFrame::error("Rate limit exceeded"));
        }

        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "Ignoring malformed client message");
                return None;
            }
        };

        match message {
            ClientMessage::JoinRoom(request) => {
                let room = GroupKey::room(request.chat_room_id.as_str());
                // Our own id, registered in open().
                if self.router.join(self.connection_id, room.clone()).is_err() {
                    return None;
                }
                debug!(connection_id = %self.connection_id, group = %room, "Joined room");
                Some(OutboundFrame::new(
                    "joinedRoom",
                    &json!({ "roomId": request.chat_room_id, "status": "success" }),
                ))
            }
            ClientMessage::LeaveRoom(request) => {
                let room = GroupKey::room(request.chat_room_id);
                if let Ok(true) = self.router.leave(self.connection_id, &room) {
                    debug!(connection_id = %self.connection_id, group = %room, "Left room");
                }
                None
            }
            ClientMessage::Typing(request) => {
                self.publish_typing(EventType::UserTyping, request.chat_room_id)
                    .await;
                None
            }
            ClientMessage::StopTyping(request) => {
                self.publish_typing(EventType::UserStopTyping, request.chat_room_id)
                    .await;
                None
            }
        }
    }

    /// Typing goes through the bus so members on every relay see it.
    async fn publish_typing(&self, event_type: EventType, room_id: String) {
        let Some(user_id) = self.user_id.clone() else {
            debug!(connection_id = %self.connection_id, "Ignoring typing from anonymous connection");
            return;
        };

        let event = match Event::builder(event_type)
            .in_room(room_id)
            .field("userId", user_id)
            .build()
        {
            Ok(event) => event,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "Ignoring typing event");
                return;
            }
        };

        if let Err(e) = self.publisher.publish(event).await {
            warn!(connection_id = %self.connection_id, error = %e, "Failed to publish typing event");
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.router.remove_connection(self.connection_id);
        CONNECTIONS_ACTIVE.dec();
        info!(connection_id = %self.connection_id, "WebSocket connection closed");
    }
}

/// Drive an upgraded socket until it closes, errors or goes idle.
pub async fn serve_socket(
    socket: WebSocket,
    router: Arc<MembershipRouter>,
    publisher: SignedPublisher,
    config: WebSocketConfig,
    user_id: Option<String>,
) {
    let idle_timeout = config.idle_timeout;
    let ping_interval = config.ping_interval;
    let (mut session, mut outbound) = ConnectionSession::open(router, publisher, config, user_id);
    let connection_id = session.connection_id();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.tick().await;
        loop {
            let frame = tokio::select! {
                frame = outbound.recv() => frame,
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let Some(frame) = frame else {
                break;
            };
            if let Err(e) = sink.send(Message::Text(frame.text().to_string())).await {
                debug!(connection_id = %connection_id, error = %e, "Failed to send frame");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let next = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                info!(connection_id = %connection_id, "Closing idle WebSocket connection");
                break;
            }
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    debug!(connection_id = %connection_id, "Ignoring non UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                debug!(connection_id = %connection_id, "WebSocket close received");
                break;
            }
            Some(Err(e)) => {
                warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        };

        if let Some(reply) = session.handle_text(&text).await {
            if !session.reply(reply).await {
                break;
            }
        }
    }

    // Dropping the session unregisters it, which closes the outbound queue.
    drop(session);
    let _ = writer.await;
}
