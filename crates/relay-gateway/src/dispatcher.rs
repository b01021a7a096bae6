//! # Fan-out Dispatcher
//!
//! Turns a verified envelope into frames on local connections.
//!
//! The client payload is the event's fields with the envelope security
//! fields already gone, plus `eventType` and a receipt `timestamp` in
//! milliseconds. Delivery is at most once per connection per event: a
//! connection reached through the room is skipped for the room
//! notification. Queues are never awaited; a full queue drops the frame.

use crate::connection::{ConnectionId, OutboundFrame};
use crate::membership::{MembershipRouter, Resolution};
use crate::ROOM_NOTIFICATION_EVENT;
use chrono::{DateTime, SecondsFormat, Utc};
use relay_bus::VerifiedEnvelope;
use relay_telemetry::metrics::{DELIVERIES, DELIVERIES_DROPPED, FORCE_JOINS};
use relay_types::event::{EVENT_TYPE_FIELD, ROOM_FIELD};
use relay_types::security::current_timestamp_millis;
use relay_types::{Event, EventType, GroupKey, Target};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// What one dispatch did on this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Frames queued for the event itself.
    pub delivered: usize,
    /// Room notifications queued.
    pub notified: usize,
    /// Frames lost to full or closed queues.
    pub dropped: usize,
    /// Connections newly joined by a force-join.
    pub force_joined: usize,
    pub global: bool,
}

#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<MembershipRouter>,
}

impl Dispatcher {
    pub fn new(router: Arc<MembershipRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<MembershipRouter> {
        &self.router
    }

    pub fn dispatch(&self, verified: &VerifiedEnvelope) -> DispatchReport {
        let event = verified.event();
        let mut report = DispatchReport::default();

        match self.router.resolve_targets(event) {
            Resolution::ForceJoin { room, user_ids } => {
                report.force_joined = self.router.force_join(&room, &user_ids);
                FORCE_JOINS.inc_by(report.force_joined as f64);
            }
            Resolution::Nothing => {
                warn!(
                    event_type = %event.event_type(),
                    nonce = verified.nonce(),
                    "Verified event has nothing to act on"
                );
            }
            Resolution::Global => {
                let frame = OutboundFrame::new(event.event_type().as_str(), &client_payload(event));
                let targets: HashSet<ConnectionId> =
                    self.router.connection_ids().into_iter().collect();
                let (delivered, dropped) = self.send(&targets, &frame, &mut HashSet::new());
                report.delivered = delivered;
                report.dropped = dropped;
                report.global = true;
                DELIVERIES
                    .with_label_values(&["global"])
                    .inc_by(delivered as f64);
                warn!(
                    audit = "global_broadcast",
                    event_type = %event.event_type(),
                    nonce = verified.nonce(),
                    delivered,
                    "Global broadcast to every local connection"
                );
            }
            Resolution::Scoped {
                groups,
                notify,
                exclude,
            } => {
                let payload = client_payload(event);
                let excluded = exclude
                    .as_ref()
                    .map(|group| self.router.members(group))
                    .unwrap_or_default();
                let mut reached = excluded;

                let frame = OutboundFrame::new(event.event_type().as_str(), &payload);
                for group in &groups {
                    let members = self.router.members(group);
                    let (delivered, dropped) = self.send(&members, &frame, &mut reached);
                    report.delivered += delivered;
                    report.dropped += dropped;
                    DELIVERIES
                        .with_label_values(&[scope_label(group)])
                        .inc_by(delivered as f64);
                }

                if !notify.is_empty() {
                    let notification = OutboundFrame::new(ROOM_NOTIFICATION_EVENT, &payload);
                    for group in &notify {
                        let members = self.router.members(group);
                        let (delivered, dropped) = self.send(&members, &notification, &mut reached);
                        report.notified += delivered;
                        report.dropped += dropped;
                    }
                    DELIVERIES
                        .with_label_values(&["notify"])
                        .inc_by(report.notified as f64);
                }

                debug!(
                    event_type = %event.event_type(),
                    groups = ?groups.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    delivered = report.delivered,
                    notified = report.notified,
                    "Event dispatched"
                );
            }
        }

        if report.dropped > 0 {
            DELIVERIES_DROPPED.inc_by(report.dropped as f64);
        }
        report
    }

    /// Queue `frame` to every target not yet in `reached`; adds the ones
    /// queued to `reached`. Returns (queued, dropped).
    fn send(
        &self,
        targets: &HashSet<ConnectionId>,
        frame: &OutboundFrame,
        reached: &mut HashSet<ConnectionId>,
    ) -> (usize, usize) {
        let mut queued = 0;
        let mut dropped = 0;
        for connection_id in targets {
            if reached.contains(connection_id) {
                continue;
            }
            let Some(sender) = self.router.sender(*connection_id) else {
                continue;
            };
            match sender.try_send(frame.clone()) {
                Ok(()) => {
                    queued += 1;
                    reached.insert(*connection_id);
                }
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    warn!(connection_id = %connection_id, "Outbound queue full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    dropped += 1;
                    debug!(connection_id = %connection_id, "Outbound queue closed");
                }
            }
        }
        (queued, dropped)
    }
}

fn scope_label(group: &GroupKey) -> &'static str {
    match group {
        GroupKey::Room(_) => "room",
        GroupKey::User(_) => "user",
    }
}

/// Event fields as clients see them.
pub fn client_payload(event: &Event) -> Value {
    let mut payload: Map<String, Value> = event.fields().clone();
    payload.insert(
        EVENT_TYPE_FIELD.to_string(),
        Value::String(event.event_type().as_str().to_string()),
    );
    payload.insert(
        "timestamp".to_string(),
        Value::from(current_timestamp_millis()),
    );

    if *event.event_type() == EventType::NewMessage && event.field("messageId").is_some() {
        payload.insert("message".to_string(), reconstruct_message(event));
    }
    Value::Object(payload)
}

/// `message` object for `new_message` events sent as flat fields.
///
/// `sender` prefers the unsigned `senderInfo` display data; the signed
/// `senderId` stays in the payload as the field clients authenticate on.
fn reconstruct_message(event: &Event) -> Value {
    let mut message = Map::new();
    let copy = |message: &mut Map<String, Value>, to: &str, value: Option<&Value>| {
        if let Some(value) = value {
            message.insert(to.to_string(), value.clone());
        }
    };

    copy(&mut message, "_id", event.field("messageId"));
    let room = match event.target() {
        Target::Room(room) => Some(Value::String(room.clone())),
        _ => event.field(ROOM_FIELD).cloned(),
    };
    copy(&mut message, "room", room.as_ref());

    let sender = event
        .field("senderInfo")
        .filter(|info| is_truthy(info))
        .or_else(|| event.field("senderId"));
    copy(&mut message, "sender", sender);
    copy(&mut message, "content", event.field("content"));
    copy(&mut message, "type", event.field("type"));
    message.insert(
        "createdAt".to_string(),
        created_at(event.field("timestamp")).map_or(Value::Null, Value::String),
    );
    Value::Object(message)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// ISO-8601 rendering of the producer's `timestamp` (milliseconds or a date string).
fn created_at(timestamp: Option<&Value>) -> Option<String> {
    let parsed = match timestamp? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }?;
    Some(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}
