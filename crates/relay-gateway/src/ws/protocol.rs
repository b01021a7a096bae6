//! Client control messages, `{"event": <name>, "data": {...}}`.

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Answered with `joinedRoom`.
    #[serde(rename = "joinRoom")]
    JoinRoom(RoomRequest),
    #[serde(rename = "leaveRoom")]
    LeaveRoom(RoomRequest),
    /// Re-published as `userTyping`.
    #[serde(rename = "clientTyping")]
    Typing(RoomRequest),
    /// Re-published as `userStopTyping`.
    #[serde(rename = "clientStopTyping")]
    StopTyping(RoomRequest),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn room_id(&self) -> &str {
        match self {
            Self::JoinRoom(request)
            | Self::LeaveRoom(request)
            | Self::Typing(request)
            | Self::StopTyping(request) => &request.chat_room_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomRequest {
    #[serde(rename = "chatRoomId", alias = "roomId", deserialize_with = "room_id")]
    pub chat_room_id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

fn room_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let id = match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    };
    if id.is_empty() {
        return Err(de::Error::custom("room id must not be empty"));
    }
    Ok(id)
}
