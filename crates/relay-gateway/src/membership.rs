//! # Membership Router
//!
//! Local table of connections and the multicast groups they belong to.
//!
//! Groups are `room:<id>` (joined by the client or by a force-join) and
//! `user:<id>` (joined automatically on connect when an identity is
//! presented). Nothing here is shared across processes.
//!
//! Lock order is always `connections` before `groups`; no path holds a
//! `groups` guard while touching `connections`.

use crate::connection::{ConnectionId, OutboundFrame};
use dashmap::DashMap;
use relay_types::{Event, EventType, GroupKey, Target};
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// Where a verified event should go on this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Deliver to `groups`; send a room notification to `notify`; skip every
    /// connection that belongs to `exclude`.
    Scoped {
        groups: Vec<GroupKey>,
        notify: Vec<GroupKey>,
        exclude: Option<GroupKey>,
    },
    /// Every local connection. Audited.
    Global,
    /// Membership change only, no delivery.
    ForceJoin { room: GroupKey, user_ids: Vec<String> },
    /// Nothing to do, e.g. a force-join without users.
    Nothing,
}

struct ConnectionEntry {
    user_id: Option<String>,
    groups: HashSet<GroupKey>,
    sender: mpsc::Sender<OutboundFrame>,
}

#[derive(Default)]
pub struct MembershipRouter {
    groups: DashMap<GroupKey, HashSet<ConnectionId>>,
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl MembershipRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. With a user id it joins `user:<id>` straight away;
    /// anonymous connections join nothing.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        user_id: Option<String>,
        sender: mpsc::Sender<OutboundFrame>,
    ) {
        let user_id = user_id.filter(|id| !id.is_empty());
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id: user_id.clone(),
                groups: HashSet::new(),
                sender,
            },
        );

        if let Some(user_id) = user_id {
            // Just inserted, cannot be unknown.
            let _ = self.join(connection_id, GroupKey::user(user_id));
        }
        debug!(connection_id = %connection_id, "Connection registered");
    }

    /// Join a group. Returns `true` if the connection was not already a member.
    pub fn join(
        &self,
        connection_id: ConnectionId,
        group: GroupKey,
    ) -> Result<bool, MembershipError> {
        let mut entry = self
            .connections
            .get_mut(&connection_id)
            .ok_or(MembershipError::UnknownConnection(connection_id))?;

        let added = entry.groups.insert(group.clone());
        if added {
            self.groups
                .entry(group.clone())
                .or_default()
                .insert(connection_id);
            debug!(connection_id = %connection_id, group = %group, "Joined group");
        }
        Ok(added)
    }

    /// Leave a group. Returns `true` if the connection was a member.
    pub fn leave(
        &self,
        connection_id: ConnectionId,
        group: &GroupKey,
    ) -> Result<bool, MembershipError> {
        let mut entry = self
            .connections
            .get_mut(&connection_id)
            .ok_or(MembershipError::UnknownConnection(connection_id))?;

        let removed = entry.groups.remove(group);
        if removed {
            self.remove_member(group, connection_id);
            debug!(connection_id = %connection_id, group = %group, "Left group");
        }
        Ok(removed)
    }

    /// Drop a connection and all its memberships.
    pub fn remove_connection(&self, connection_id: ConnectionId) -> bool {
        match self.connections.remove(&connection_id) {
            Some((_, entry)) => {
                for group in &entry.groups {
                    self.remove_member(group, connection_id);
                }
                debug!(
                    connection_id = %connection_id,
                    groups = entry.groups.len(),
                    "Removed connection"
                );
                true
            }
            None => false,
        }
    }

    fn remove_member(&self, group: &GroupKey, connection_id: ConnectionId) {
        let now_empty = match self.groups.get_mut(group) {
            Some(mut members) => {
                members.remove(&connection_id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.groups.remove_if(group, |_, members| members.is_empty());
        }
    }

    /// Local members of a group.
    pub fn members(&self, group: &GroupKey) -> HashSet<ConnectionId> {
        self.groups
            .get(group)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, connection_id: ConnectionId, group: &GroupKey) -> bool {
        self.groups
            .get(group)
            .is_some_and(|members| members.contains(&connection_id))
    }

    /// Outbound queue of a connection.
    pub fn sender(&self, connection_id: ConnectionId) -> Option<mpsc::Sender<OutboundFrame>> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.sender.clone())
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.connections
            .get(&connection_id)
            .and_then(|entry| entry.user_id.clone())
    }

    pub fn groups_of(&self, connection_id: ConnectionId) -> Vec<GroupKey> {
        let mut groups: Vec<GroupKey> = self
            .connections
            .get(&connection_id)
            .map(|entry| entry.groups.iter().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Map an event to its destination groups.
    pub fn resolve_targets(&self, event: &Event) -> Resolution {
        if *event.event_type() == EventType::ForceJoinRoom {
            return match event.force_join_spec() {
                Some((room, user_ids)) if !user_ids.is_empty() => Resolution::ForceJoin {
                    room: GroupKey::room(room),
                    user_ids,
                },
                _ => Resolution::Nothing,
            };
        }

        let notify = event
            .notify_user_ids()
            .iter()
            .map(|id| GroupKey::user(id.clone()))
            .collect();

        match event.target() {
            Target::Room(room) => {
                let exclude = if event.event_type().is_typing_indicator() {
                    event.id_field("userId").map(GroupKey::user)
                } else {
                    None
                };
                Resolution::Scoped {
                    groups: vec![GroupKey::room(room.clone())],
                    notify,
                    exclude,
                }
            }
            Target::User(user) => Resolution::Scoped {
                groups: vec![GroupKey::user(user.clone())],
                notify,
                exclude: None,
            },
            Target::Global => Resolution::Global,
        }
    }

    /// Join every live connection of each user to `room`, without any client
    /// action. Returns the number of connections that newly joined.
    pub fn force_join(&self, room: &GroupKey, user_ids: &[String]) -> usize {
        let mut joined = 0;
        for user_id in user_ids {
            for connection_id in self.members(&GroupKey::user(user_id.clone())) {
                if let Ok(true) = self.join(connection_id, room.clone()) {
                    joined += 1;
                }
            }
        }
        info!(room = %room, users = user_ids.len(), joined, "Force-join applied");
        joined
    }
}
