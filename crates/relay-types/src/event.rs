//! # Events
//!
//! The unit of work flowing from the API tier to the relay fleet, plus the
//! group keys that name multicast destinations on a connection server.

use crate::errors::Rejection;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Wire name of the event type field.
pub const EVENT_TYPE_FIELD: &str = "eventType";

/// Wire name of the room target.
pub const ROOM_FIELD: &str = "chatRoomId";

/// Accepted alias for [`ROOM_FIELD`].
pub const ROOM_ALIAS_FIELD: &str = "roomId";

/// Wire name of a single-user target.
pub const TARGET_USER_FIELD: &str = "targetUserId";

/// Wire name of the out-of-room notify list.
pub const NOTIFY_FIELD: &str = "notifyUserIds";

/// Force-join payload: users to move.
pub const FORCE_JOIN_USERS_FIELD: &str = "userIds";

/// Force-join payload: destination room.
pub const FORCE_JOIN_ROOM_FIELD: &str = "room";

// =============================================================================
// EVENT TYPE
// =============================================================================

/// All event types a producer may emit.
///
/// Anything else parses to [`EventType::Unknown`] so the relay can reject it
/// explicitly instead of silently ignoring it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    NewMessage,
    MessageRead,
    Typing,
    StopTyping,
    NewMsg,
    UserTyping,
    UserStopTyping,
    DeleteMsg,
    PinMsg,
    EditMsg,
    ReactMsg,
    RoomUpdated,
    Notification,
    /// Administrative: joins users' live sockets to a room.
    ForceJoinRoom,
    /// Not in the supported set. Carries the raw tag.
    Unknown(String),
}

impl EventType {
    /// Every supported tag, in wire form.
    pub const KNOWN_TAGS: &'static [&'static str] = &[
        "new_message",
        "message_read",
        "typing",
        "stop_typing",
        "newMsg",
        "userTyping",
        "userStopTyping",
        "deleteMsg",
        "pinMsg",
        "editMsg",
        "reactMsg",
        "roomUpdated",
        "notification",
        "forceJoinRoom",
    ];

    /// Parse a wire tag.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag {
            "new_message" => Self::NewMessage,
            "message_read" => Self::MessageRead,
            "typing" => Self::Typing,
            "stop_typing" => Self::StopTyping,
            "newMsg" => Self::NewMsg,
            "userTyping" => Self::UserTyping,
            "userStopTyping" => Self::UserStopTyping,
            "deleteMsg" => Self::DeleteMsg,
            "pinMsg" => Self::PinMsg,
            "editMsg" => Self::EditMsg,
            "reactMsg" => Self::ReactMsg,
            "roomUpdated" => Self::RoomUpdated,
            "notification" => Self::Notification,
            "forceJoinRoom" => Self::ForceJoinRoom,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NewMessage => "new_message",
            Self::MessageRead => "message_read",
            Self::Typing => "typing",
            Self::StopTyping => "stop_typing",
            Self::NewMsg => "newMsg",
            Self::UserTyping => "userTyping",
            Self::UserStopTyping => "userStopTyping",
            Self::DeleteMsg => "deleteMsg",
            Self::PinMsg => "pinMsg",
            Self::EditMsg => "editMsg",
            Self::ReactMsg => "reactMsg",
            Self::RoomUpdated => "roomUpdated",
            Self::Notification => "notification",
            Self::ForceJoinRoom => "forceJoinRoom",
            Self::Unknown(tag) => tag,
        }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Typing indicators are never echoed back to the typing user.
    #[must_use]
    pub fn is_typing_indicator(&self) -> bool {
        matches!(
            self,
            Self::Typing | Self::StopTyping | Self::UserTyping | Self::UserStopTyping
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

// =============================================================================
// GROUP KEYS AND TARGETS
// =============================================================================

/// A multicast group on a connection server: `room:<id>` or `user:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Room(String),
    User(String),
}

impl GroupKey {
    pub fn room(id: impl Into<String>) -> Self {
        Self::Room(id.into())
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    /// Parse the namespaced string form.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let (namespace, id) = key.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        match namespace {
            "room" => Some(Self::Room(id.to_string())),
            "user" => Some(Self::User(id.to_string())),
            _ => None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Room(id) | Self::User(id) => id,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(id) => write!(f, "room:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Who an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Room(String),
    User(String),
    /// No target: every connection on every relay. Rare and audited.
    Global,
}

impl Target {
    /// The group this target maps to, if it is scoped.
    #[must_use]
    pub fn group(&self) -> Option<GroupKey> {
        match self {
            Self::Room(id) => Some(GroupKey::room(id.clone())),
            Self::User(id) => Some(GroupKey::user(id.clone())),
            Self::Global => None,
        }
    }
}

// =============================================================================
// EVENT
// =============================================================================

/// An immutable event as produced by the API tier.
///
/// `fields` holds every wire field except `eventType`; target and notify
/// list are derived from it once, at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: EventType,
    target: Target,
    fields: Map<String, Value>,
    notify_user_ids: Vec<String>,
}

impl Event {
    pub fn builder(event_type: EventType) -> EventBuilder {
        EventBuilder::new(event_type)
    }

    /// Administrative event joining each user's live sockets to `room`.
    #[must_use]
    pub fn force_join(room: impl Into<String>, user_ids: &[String]) -> Self {
        let mut fields = Map::new();
        fields.insert(
            FORCE_JOIN_USERS_FIELD.to_string(),
            Value::Array(user_ids.iter().cloned().map(Value::String).collect()),
        );
        fields.insert(FORCE_JOIN_ROOM_FIELD.to_string(), Value::String(room.into()));
        Self {
            event_type: EventType::ForceJoinRoom,
            target: Target::Global,
            fields,
            notify_user_ids: Vec::new(),
        }
    }

    /// Build an event from its wire fields (`eventType` included).
    ///
    /// # Errors
    ///
    /// `Rejection::MalformedEnvelope` when `eventType` is missing or any
    /// routing field has the wrong shape.
    pub fn from_fields(mut fields: Map<String, Value>) -> Result<Self, Rejection> {
        let event_type = match fields.remove(EVENT_TYPE_FIELD) {
            Some(Value::String(tag)) => EventType::parse(&tag),
            Some(_) => return Err(Rejection::malformed("eventType must be a string")),
            None => return Err(Rejection::malformed("missing eventType")),
        };

        let target = if let Some(room) = routing_id(&fields, ROOM_FIELD)? {
            Target::Room(room)
        } else if let Some(room) = routing_id(&fields, ROOM_ALIAS_FIELD)? {
            Target::Room(room)
        } else if let Some(user) = routing_id(&fields, TARGET_USER_FIELD)? {
            Target::User(user)
        } else {
            Target::Global
        };

        let notify_user_ids = match fields.get(NOTIFY_FIELD) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    id_from_value(item)
                        .ok_or_else(|| Rejection::malformed("notifyUserIds entries must be ids"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(Rejection::malformed("notifyUserIds must be an array")),
        };

        Ok(Self {
            event_type,
            target,
            fields,
            notify_user_ids,
        })
    }

    #[must_use]
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Event-specific fields, without `eventType`.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn notify_user_ids(&self) -> &[String] {
        &self.notify_user_ids
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// A field interpreted as an identifier (string or number).
    #[must_use]
    pub fn id_field(&self, key: &str) -> Option<String> {
        self.fields.get(key).and_then(id_from_value)
    }

    /// `(room, user_ids)` for a force-join event, `None` for anything else
    /// or when the payload is incomplete.
    #[must_use]
    pub fn force_join_spec(&self) -> Option<(String, Vec<String>)> {
        if self.event_type != EventType::ForceJoinRoom {
            return None;
        }
        let room = self.id_field(FORCE_JOIN_ROOM_FIELD)?;
        let users = self
            .fields
            .get(FORCE_JOIN_USERS_FIELD)?
            .as_array()?
            .iter()
            .filter_map(id_from_value)
            .collect();
        Some((room, users))
    }

    /// Wire fields including `eventType`.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(
            EVENT_TYPE_FIELD.to_string(),
            Value::String(self.event_type.as_str().to_string()),
        );
        for (key, value) in &self.fields {
            fields.insert(key.clone(), value.clone());
        }
        fields
    }
}

/// Fluent construction of producer-side events.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event_type: EventType,
    fields: Map<String, Value>,
}

impl EventBuilder {
    fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            fields: Map::new(),
        }
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.fields
            .insert(ROOM_FIELD.to_string(), Value::String(room_id.into()));
        self
    }

    pub fn to_user(mut self, user_id: impl Into<String>) -> Self {
        self.fields
            .insert(TARGET_USER_FIELD.to_string(), Value::String(user_id.into()));
        self
    }

    pub fn notify<I, S>(mut self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = user_ids
            .into_iter()
            .map(|id| Value::String(id.into()))
            .collect();
        self.fields.insert(NOTIFY_FIELD.to_string(), Value::Array(ids));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// # Errors
    ///
    /// Fails if a routing field was set with an unusable value.
    pub fn build(self) -> Result<Event, Rejection> {
        let mut fields = self.fields;
        fields.insert(
            EVENT_TYPE_FIELD.to_string(),
            Value::String(self.event_type.as_str().to_string()),
        );
        Event::from_fields(fields)
    }
}

/// Identifier carried as a non-empty string or a number.
fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn routing_id(fields: &Map<String, Value>, key: &str) -> Result<Option<String>, Rejection> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => id_from_value(value)
            .map(Some)
            .ok_or_else(|| Rejection::malformed(format!("{key} must be a non-empty id"))),
    }
}
