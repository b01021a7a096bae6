//! WebSocket front end.
//!
//! - client control messages: joinRoom, leaveRoom, clientTyping, clientStopTyping
//! - message size limits and rate limiting per connection
//! - ping keep-alive and idle timeout

pub mod handler;
pub mod protocol;

pub use handler::{
    serve_socket, ConnectionSession, WebSocketConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_OUTBOUND_BUFFER, DEFAULT_PING_INTERVAL, DEFAULT_RATE_LIMIT,
};
pub use protocol::{ClientMessage, RoomRequest};
