//! Per-connection state machine.
//!
//! ```text
//! Connecting ──authenticate──▶ Authenticated ──join_room──▶ Active ──close──▶ Closed
//!      └───────────────────────────────close──────────────────────────────────▲
//! ```
//!
//! A session owns nothing shared; it only calls into the [`Hub`]
//! components. Events that fail validation are dropped.

use crate::auth::Identity;
use crate::error::ChatError;
use crate::hub::Hub;
use crate::message::{ConnectionHandle, RoomId, UserId};
use bytes::BytesMut;
use parley_protocol::{codec, ClientEvent, ServerEvent, UserIdentity};
use std::collections::HashSet;
use tracing::{debug, info, trace, warn};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open, no identity yet.
    Connecting,
    /// Identity verified, no rooms joined yet.
    Authenticated,
    /// Joined at least one room.
    Active,
    /// Terminal.
    Closed,
}

/// One live client connection.
pub struct ConnectionSession {
    handle: ConnectionHandle,
    state: SessionState,
    identity: Option<Identity>,
    rooms: HashSet<RoomId>,
    online: bool,
    hub: Hub,
}

impl ConnectionSession {
    pub(crate) fn new(handle: ConnectionHandle, identity: Option<Identity>, hub: Hub) -> Self {
        let state = if identity.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Connecting
        };

        Self {
            handle,
            state,
            identity,
            rooms: HashSet::new(),
            online: false,
            hub,
        }
    }

    /// Get the connection handle.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get the verified identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Rooms joined through this session.
    #[must_use]
    pub fn rooms(&self) -> &HashSet<RoomId> {
        &self.rooms
    }

    /// Check if the session is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Decode and handle a JSON text payload. Undecodable payloads are dropped.
    pub async fn handle_text(&mut self, text: &str) {
        match codec::from_json::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => debug!(connection = %self.handle, error = %e, "Dropping undecodable text payload"),
        }
    }

    /// Decode and handle a length-prefixed MessagePack payload.
    pub async fn handle_binary(&mut self, data: &[u8]) {
        let mut buf = BytesMut::from(data);
        loop {
            match codec::decode_from::<ClientEvent>(&mut buf) {
                Ok(Some(event)) => self.handle_event(event).await,
                Ok(None) => break,
                Err(e) => {
                    debug!(connection = %self.handle, error = %e, "Dropping undecodable binary payload");
                    return;
                }
            }
        }
        if !buf.is_empty() {
            debug!(connection = %self.handle, trailing = buf.len(), "Dropping truncated binary event");
        }
    }

    /// Handle one inbound event.
    pub async fn handle_event(&mut self, event: ClientEvent) {
        let kind = event.event_type();
        if self.is_closed() {
            debug!(connection = %self.handle, event = ?kind, "Ignoring event on closed session");
            return;
        }
        trace!(connection = %self.handle, event = ?kind, state = ?self.state, "Inbound event");

        match event {
            ClientEvent::Authenticate { token } => self.on_authenticate(token),
            ClientEvent::JoinRoom { room_id, user_data } => self.on_join(room_id, user_data),
            ClientEvent::LeaveRoom { room_id, user_data } => self.on_leave(room_id, user_data),
            ClientEvent::SendMessage {
                room_id,
                user_id,
                username,
                message,
                encrypt,
            } => self.on_send(room_id, user_id, username, message, encrypt).await,
            ClientEvent::Typing {
                room_id,
                username,
                is_typing,
            } => self.on_typing(room_id, username, is_typing),
        }
    }

    fn on_authenticate(&mut self, token: Option<String>) {
        if self.state == SessionState::Active {
            self.reply(ServerEvent::error(409, "Already authenticated"));
            return;
        }

        match self.hub.auth().identify(token.as_deref().unwrap_or_default()) {
            Ok(identity) => {
                debug!(connection = %self.handle, user = %identity.user_id, "Session authenticated");
                self.identity = Some(identity);
                self.state = SessionState::Authenticated;
            }
            Err(e) => {
                debug!(connection = %self.handle, error = %e, "Authentication failed");
                self.reply(ServerEvent::error(401, e.to_string()));
            }
        }
    }

    fn on_join(&mut self, room_id: Option<String>, user_data: Option<UserIdentity>) {
        let (Some(room_id), Some(user)) = (room_id, user_data) else {
            debug!(connection = %self.handle, "Dropping join_room with missing fields");
            return;
        };
        let Some(identity) = &self.identity else {
            debug!(connection = %self.handle, room = %room_id, "Dropping join_room from unauthenticated connection");
            return;
        };
        if identity.user_id != user.id {
            warn!(
                connection = %self.handle,
                claimed = %user.id,
                verified = %identity.user_id,
                "Dropping join_room for another user"
            );
            return;
        }

        if !self.online {
            if self.hub.presence().mark_online(&user.id, &self.handle) {
                info!(user = %user.id, username = %user.username, "User online");
            }
            self.online = true;
        }

        self.state = SessionState::Active;
        if self.hub.broadcaster().join(&room_id, &self.handle, &user) {
            self.rooms.insert(room_id);
        }
    }

    fn on_leave(&mut self, room_id: Option<String>, user_data: Option<UserIdentity>) {
        let (Some(room_id), Some(user)) = (room_id, user_data) else {
            return;
        };
        if !self.identity.as_ref().is_some_and(|identity| identity.user_id == user.id) {
            warn!(
                connection = %self.handle,
                room = %room_id,
                claimed = %user.id,
                "Dropping leave_room for another user"
            );
            return;
        }
        if self.hub.broadcaster().leave(&room_id, &self.handle, &user) {
            self.rooms.remove(&room_id);
        }
    }

    async fn on_send(
        &mut self,
        room_id: Option<String>,
        user_id: Option<String>,
        username: Option<String>,
        message: Option<String>,
        encrypt: bool,
    ) {
        let (Some(room_id), Some(user_id), Some(username), Some(body)) =
            (room_id, user_id, username, message)
        else {
            debug!(connection = %self.handle, "Dropping send_message with missing fields");
            return;
        };
        let verified = self
            .identity
            .as_ref()
            .is_some_and(|identity| identity.user_id == user_id);
        if !verified {
            warn!(connection = %self.handle, claimed = %user_id, "Dropping send_message for another user");
            return;
        }

        let result = self
            .hub
            .pipeline()
            .submit(&room_id, &user_id, &username, &body, encrypt)
            .await;

        match result {
            Ok(_) => {}
            Err(ChatError::Validation(reason)) => {
                debug!(connection = %self.handle, reason = %reason, "Dropping invalid message");
            }
            Err(e) => {
                warn!(connection = %self.handle, room = %room_id, error = %e, "Message rejected");
                self.reply(ServerEvent::error(e.code(), e.to_string()));
            }
        }
    }

    fn on_typing(&self, room_id: Option<String>, username: Option<String>, is_typing: bool) {
        let Some(room_id) = room_id else {
            return;
        };
        self.hub
            .broadcaster()
            .broadcast(&room_id, ServerEvent::UserTyping { username, is_typing });
    }

    fn reply(&self, event: ServerEvent) {
        self.hub.broadcaster().send_to(&self.handle, event);
    }

    /// Close the session, leaving every room.
    ///
    /// Returns the user id if this was the user's last connection, in which
    /// case every connection has been sent `user_offline`. Closing twice is
    /// a no-op.
    pub fn close(&mut self) -> Option<UserId> {
        if self.is_closed() {
            return None;
        }
        self.state = SessionState::Closed;
        self.rooms.clear();

        self.hub.broadcaster().leave_all(&self.handle);
        let offline = self.hub.presence().mark_offline(&self.handle)?;

        info!(user = %offline, "User offline");
        self.hub
            .broadcaster()
            .broadcast_all(ServerEvent::user_offline(offline.clone()));
        Some(offline)
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
