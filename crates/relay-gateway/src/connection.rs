//! Connection identity and the frames queued to a connection.

use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of one live WebSocket connection on this process.
///
/// UUID v7, so ids sort by connect time in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One text frame for a client: `{"event": <name>, "data": <payload>}`.
///
/// Encoded once and shared between every recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    text: Arc<str>,
}

impl OutboundFrame {
    pub fn new(event: &str, data: &Value) -> Self {
        let text = json!({ "event": event, "data": data }).to_string();
        Self { text: text.into() }
    }

    /// Error frame for protocol violations.
    pub fn error(message: &str) -> Self {
        Self::new("error", &json!({ "message": message }))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Decoded form, mainly for assertions and debugging.
    pub fn to_value(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }

    pub fn event_name(&self) -> Option<String> {
        self.to_value()
            .get("event")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}
