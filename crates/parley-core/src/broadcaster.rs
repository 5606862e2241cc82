//! Room membership and event fan-out.
//!
//! Every connection registers an outbox with the broadcaster when it opens.
//! Rooms are sets of connection handles; broadcasting pushes an event onto
//! the outbox of each member. Outboxes are unbounded, so a slow reader never
//! blocks the sender.
//!
//! Lock order is a connection's notice lock, then the connections map, then
//! the rooms map. Fan-out snapshots a room's members before touching the
//! connections map. The notice lock is held while a membership change is
//! announced, so notices about one connection reach each peer in the order
//! the changes happened.

use crate::message::{ConnectionHandle, RoomId};
use crate::presence::PresenceRegistry;
use dashmap::DashMap;
use parley_protocol::{ServerEvent, UserIdentity};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving end of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

struct ConnectionEntry {
    sender: mpsc::UnboundedSender<Arc<ServerEvent>>,
    /// Joined rooms and the identity announced in each.
    rooms: HashMap<RoomId, UserIdentity>,
    notices: Arc<Mutex<()>>,
}

fn hold(notices: &Mutex<()>) -> MutexGuard<'_, ()> {
    notices.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routes events to the connections subscribed to a room.
pub struct RoomBroadcaster {
    /// Live connections indexed by handle.
    connections: DashMap<ConnectionHandle, ConnectionEntry>,
    /// Room membership (room -> handles).
    rooms: DashMap<RoomId, HashSet<ConnectionHandle>>,
    presence: Arc<PresenceRegistry>,
}

impl RoomBroadcaster {
    /// Create a broadcaster resolving room users through `presence`.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            presence,
        }
    }

    /// Register a connection and return its outbox.
    ///
    /// Registering a handle again replaces its outbox and forgets its rooms.
    pub fn connect(&self, handle: &ConnectionHandle) -> Outbox {
        let (sender, receiver) = mpsc::unbounded_channel();
        let entry = ConnectionEntry {
            sender,
            rooms: HashMap::new(),
            notices: Arc::default(),
        };

        if let Some(stale) = self.connections.insert(handle.clone(), entry) {
            for room_id in stale.rooms.keys() {
                self.remove_member(room_id, handle);
            }
        }

        debug!(connection = %handle, "Connection registered");
        receiver
    }

    fn notices_of(&self, handle: &ConnectionHandle) -> Option<Arc<Mutex<()>>> {
        self.connections
            .get(handle)
            .map(|conn| Arc::clone(&conn.notices))
    }

    /// Check if a handle is registered.
    #[must_use]
    pub fn is_connected(&self, handle: &ConnectionHandle) -> bool {
        self.connections.contains_key(handle)
    }

    /// Add a connection to a room.
    ///
    /// On a new membership, other members receive `user_joined` and then the
    /// whole room, newcomer included, receives `online_users`. Returns `false`
    /// without emitting anything if the handle was already a member or is not
    /// connected.
    pub fn join(
        &self,
        room_id: &str,
        handle: &ConnectionHandle,
        announce_as: &UserIdentity,
    ) -> bool {
        let Some(notices) = self.notices_of(handle) else {
            debug!(room = %room_id, connection = %handle, "Join from unknown connection");
            return false;
        };
        let _ordered = hold(&notices);
        {
            // Re-checked under the guard: leave_all may have run meanwhile.
            let Some(mut conn) = self.connections.get_mut(handle) else {
                return false;
            };
            if !Arc::ptr_eq(&conn.notices, &notices) || conn.rooms.contains_key(room_id) {
                return false;
            }

            // Both inserts happen under the connection's guard so a concurrent
            // leave_all either sees this room or runs before it exists.
            conn.rooms.insert(room_id.to_string(), announce_as.clone());
            self.rooms
                .entry(room_id.to_string())
                .or_default()
                .insert(handle.clone());
        }

        debug!(
            room = %room_id,
            connection = %handle,
            user = %announce_as.id,
            members = self.member_count(room_id),
            "Joined room"
        );

        self.broadcast_except(room_id, handle, ServerEvent::user_joined(announce_as.clone()));
        self.broadcast(room_id, ServerEvent::online_users(self.online_users(room_id)));
        true
    }

    /// Remove a connection from a room, notifying remaining members.
    ///
    /// Returns `false` if the handle was not a member.
    pub fn leave(
        &self,
        room_id: &str,
        handle: &ConnectionHandle,
        announce_as: &UserIdentity,
    ) -> bool {
        let Some(notices) = self.notices_of(handle) else {
            return false;
        };
        let _ordered = hold(&notices);
        {
            let Some(mut conn) = self.connections.get_mut(handle) else {
                return false;
            };
            if conn.rooms.remove(room_id).is_none() {
                return false;
            }
            self.remove_member(room_id, handle);
        }

        debug!(room = %room_id, connection = %handle, "Left room");

        self.broadcast(room_id, ServerEvent::user_left(announce_as.clone()));
        true
    }

    /// Unregister a connection and remove it from every room.
    ///
    /// Each affected room receives one `user_left` carrying the identity the
    /// connection joined with. Returns the rooms left.
    pub fn leave_all(&self, handle: &ConnectionHandle) -> Vec<RoomId> {
        let Some((_, entry)) = self.connections.remove(handle) else {
            return Vec::new();
        };
        // Waits for an in-flight join to finish announcing.
        let _ordered = hold(&entry.notices);

        let mut left = Vec::with_capacity(entry.rooms.len());
        for (room_id, identity) in entry.rooms {
            self.remove_member(&room_id, handle);
            self.broadcast(&room_id, ServerEvent::user_left(identity));
            left.push(room_id);
        }

        debug!(connection = %handle, rooms = left.len(), "Connection unregistered");
        left
    }

    fn remove_member(&self, room_id: &str, handle: &ConnectionHandle) {
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(handle);
        }
        if self
            .rooms
            .remove_if(room_id, |_, members| members.is_empty())
            .is_some()
        {
            debug!(room = %room_id, "Dropped empty room");
        }
    }

    /// Deliver an event to every member of a room.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn broadcast(&self, room_id: &str, event: ServerEvent) -> usize {
        let members = self.members(room_id);
        let count = self.deliver(&members, Arc::new(event));
        trace!(room = %room_id, recipients = count, "Broadcast");
        count
    }

    fn broadcast_except(
        &self,
        room_id: &str,
        excluded: &ConnectionHandle,
        event: ServerEvent,
    ) -> usize {
        let members: Vec<_> = self
            .members(room_id)
            .into_iter()
            .filter(|member| member != excluded)
            .collect();
        self.deliver(&members, Arc::new(event))
    }

    /// Deliver an event to every connected handle.
    pub fn broadcast_all(&self, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let count = self
            .connections
            .iter()
            .filter(|conn| conn.sender.send(event.clone()).is_ok())
            .count();
        trace!(recipients = count, "Broadcast to all connections");
        count
    }

    /// Deliver an event to a single connection.
    pub fn send_to(&self, handle: &ConnectionHandle, event: ServerEvent) -> bool {
        self.deliver(std::slice::from_ref(handle), Arc::new(event)) == 1
    }

    fn deliver(&self, handles: &[ConnectionHandle], event: Arc<ServerEvent>) -> usize {
        handles
            .iter()
            .filter(|handle| {
                self.connections
                    .get(*handle)
                    .is_some_and(|conn| conn.sender.send(event.clone()).is_ok())
            })
            .count()
    }

    /// Distinct users joined to a room, sorted.
    #[must_use]
    pub fn online_users(&self, room_id: &str) -> Vec<String> {
        self.members(room_id)
            .iter()
            .filter_map(|handle| self.presence.user_of(handle))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Snapshot of a room's members.
    #[must_use]
    pub fn members(&self, room_id: &str) -> Vec<ConnectionHandle> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of connections in a room.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |members| members.len())
    }

    /// Check if a handle is a member of a room.
    #[must_use]
    pub fn is_member(&self, room_id: &str, handle: &ConnectionHandle) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|members| members.contains(handle))
    }

    /// Rooms a handle currently belongs to.
    #[must_use]
    pub fn rooms_of(&self, handle: &ConnectionHandle) -> Vec<RoomId> {
        self.connections
            .get(handle)
            .map(|conn| conn.rooms.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Get broadcaster statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            room_count: self.rooms.len(),
            connection_count: self.connections.len(),
            total_memberships: self.rooms.iter().map(|members| members.len()).sum(),
        }
    }
}

/// Broadcaster statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterStats {
    /// Rooms with at least one member.
    pub room_count: usize,
    /// Registered connections.
    pub connection_count: usize,
    /// Sum of room sizes.
    pub total_memberships: usize,
}
