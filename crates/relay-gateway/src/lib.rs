//! # Relay Gateway
//!
//! The connection-facing half of a relay process.
//!
//! ```text
//!  bus ──► Relay::admit ──► fan-out channel ──► Relay::deliver ──► Dispatcher
//!                                                                     │
//!                                     MembershipRouter ◄──────────────┘──► mpsc ──► socket
//!                                            ▲
//!  socket ──► ws::handler (joinRoom / leaveRoom)
//! ```
//!
//! Membership is local to this process. One relay admits each envelope and
//! every relay delivers it, so local fan-out adds up to fleet-wide delivery.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod connection;
pub mod dispatcher;
pub mod health;
pub mod membership;
pub mod relay;
pub mod router;
pub mod ws;

pub use connection::{ConnectionId, OutboundFrame};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use health::StoreHealth;
pub use membership::{MembershipError, MembershipRouter, Resolution};
pub use relay::{Relay, RelayError};
pub use router::{build_router, GatewayState};
pub use ws::{ClientMessage, ConnectionSession, WebSocketConfig};

/// Client event name for out-of-room notifications.
pub const ROOM_NOTIFICATION_EVENT: &str = "roomNotification";
