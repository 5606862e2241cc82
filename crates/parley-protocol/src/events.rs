//! Event types for the Parley protocol.
//!
//! Every event on the wire is a JSON (or MessagePack) map tagged by its
//! `type` field. Field names follow the browser client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message type carried by every `new_message` event.
pub const MESSAGE_TYPE_TEXT: &str = "text";

/// Public identity of a registered user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Unique user id.
    pub id: String,
    /// Unique username.
    pub username: String,
    /// Avatar URL.
    #[serde(default)]
    pub avatar: String,
}

impl UserIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        avatar: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar: avatar.into(),
        }
    }
}

/// Inbound event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEventType {
    Authenticate,
    JoinRoom,
    LeaveRoom,
    SendMessage,
    Typing,
}

/// An event sent by a client.
///
/// Fields are optional at decode time so a malformed payload still decodes
/// into a variant; the session decides what to drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind a session token to the connection.
    Authenticate { token: Option<String> },

    /// Subscribe to a room.
    JoinRoom {
        room_id: Option<String>,
        user_data: Option<UserIdentity>,
    },

    /// Unsubscribe from a room.
    LeaveRoom {
        room_id: Option<String>,
        user_data: Option<UserIdentity>,
    },

    /// Post a message to a room.
    SendMessage {
        room_id: Option<String>,
        user_id: Option<String>,
        username: Option<String>,
        message: Option<String>,
        /// Store the body encrypted at rest.
        #[serde(default)]
        encrypt: bool,
    },

    /// Typing indicator.
    Typing {
        room_id: Option<String>,
        username: Option<String>,
        #[serde(default)]
        is_typing: bool,
    },
}

impl ClientEvent {
    /// Get the event type.
    #[must_use]
    pub fn event_type(&self) -> ClientEventType {
        match self {
            ClientEvent::Authenticate { .. } => ClientEventType::Authenticate,
            ClientEvent::JoinRoom { .. } => ClientEventType::JoinRoom,
            ClientEvent::LeaveRoom { .. } => ClientEventType::LeaveRoom,
            ClientEvent::SendMessage { .. } => ClientEventType::SendMessage,
            ClientEvent::Typing { .. } => ClientEventType::Typing,
        }
    }

    /// Create an Authenticate event.
    #[must_use]
    pub fn authenticate(token: impl Into<String>) -> Self {
        ClientEvent::Authenticate {
            token: Some(token.into()),
        }
    }

    /// Create a JoinRoom event.
    #[must_use]
    pub fn join_room(room_id: impl Into<String>, user: UserIdentity) -> Self {
        ClientEvent::JoinRoom {
            room_id: Some(room_id.into()),
            user_data: Some(user),
        }
    }

    /// Create a LeaveRoom event.
    #[must_use]
    pub fn leave_room(room_id: impl Into<String>, user: UserIdentity) -> Self {
        ClientEvent::LeaveRoom {
            room_id: Some(room_id.into()),
            user_data: Some(user),
        }
    }

    /// Create a SendMessage event.
    #[must_use]
    pub fn send_message(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        message: impl Into<String>,
        encrypt: bool,
    ) -> Self {
        ClientEvent::SendMessage {
            room_id: Some(room_id.into()),
            user_id: Some(user_id.into()),
            username: Some(username.into()),
            message: Some(message.into()),
            encrypt,
        }
    }

    /// Create a Typing event.
    #[must_use]
    pub fn typing(room_id: impl Into<String>, username: impl Into<String>, is_typing: bool) -> Self {
        ClientEvent::Typing {
            room_id: Some(room_id.into()),
            username: Some(username.into()),
            is_typing,
        }
    }
}

/// An event sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Greeting sent once the connection is registered.
    Connected {
        connection_id: String,
        version: String,
    },

    /// Someone else joined a room this connection is in.
    UserJoined { user: UserIdentity, message: String },

    /// Users currently joined to the room.
    OnlineUsers { users: Vec<String> },

    /// Someone left a room this connection is in.
    UserLeft { user: UserIdentity, message: String },

    /// A chat message posted to the room.
    NewMessage {
        id: u64,
        room_id: String,
        user_id: String,
        username: String,
        message: String,
        message_type: String,
        timestamp: DateTime<Utc>,
        encrypted: bool,
    },

    /// Typing indicator relay.
    UserTyping {
        username: Option<String>,
        is_typing: bool,
    },

    /// A user closed their last connection.
    UserOffline { user_id: String },

    /// Request failure reported to the originating connection only.
    Error { code: u16, message: String },
}

impl ServerEvent {
    /// Create a UserJoined event with the standard notice.
    #[must_use]
    pub fn user_joined(user: UserIdentity) -> Self {
        let message = format!("{} joined the room", user.username);
        ServerEvent::UserJoined { user, message }
    }

    /// Create a UserLeft event with the standard notice.
    #[must_use]
    pub fn user_left(user: UserIdentity) -> Self {
        let message = format!("{} left the room", user.username);
        ServerEvent::UserLeft { user, message }
    }

    /// Create an OnlineUsers event.
    #[must_use]
    pub fn online_users(users: impl IntoIterator<Item = String>) -> Self {
        ServerEvent::OnlineUsers {
            users: users.into_iter().collect(),
        }
    }

    /// Create a UserOffline event.
    #[must_use]
    pub fn user_offline(user_id: impl Into<String>) -> Self {
        ServerEvent::UserOffline {
            user_id: user_id.into(),
        }
    }

    /// Create an Error event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::OnlineUsers { .. } => "online_users",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::UserOffline { .. } => "user_offline",
            ServerEvent::Error { .. } => "error",
        }
    }
}
