//! Core value types: connection handles and persisted chat messages.

use chrono::{DateTime, Utc};
use parley_protocol::{ServerEvent, MESSAGE_TYPE_TEXT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A room identifier.
pub type RoomId = String;

/// A user identifier.
pub type UserId = String;

/// A message identifier, assigned by the store.
pub type MessageId = u64;

/// Disambiguates handles generated within the same nanosecond.
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier for one live client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(String);

impl ConnectionHandle {
    /// Create a handle from an existing id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, process-unique handle.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, seq))
    }

    /// Get the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A persisted chat message.
///
/// `body` holds ciphertext when `encrypted` is set. Serialized field names
/// match the REST history payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    #[serde(rename = "user_id")]
    pub sender_id: UserId,
    #[serde(rename = "username")]
    pub sender_username: String,
    #[serde(rename = "message")]
    pub body: String,
    pub encrypted: bool,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Replace the body, keeping every other field.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Build the `new_message` event for this message, carrying `body`
    /// instead of the stored one.
    #[must_use]
    pub fn to_event(&self, body: impl Into<String>) -> ServerEvent {
        ServerEvent::NewMessage {
            id: self.id,
            room_id: self.room_id.clone(),
            user_id: self.sender_id.clone(),
            username: self.sender_username.clone(),
            message: body.into(),
            message_type: MESSAGE_TYPE_TEXT.to_string(),
            timestamp: self.created_at,
            encrypted: self.encrypted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_generation() {
        let a = ConnectionHandle::generate();
        let b = ConnectionHandle::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_message_event_uses_given_body() {
        let message = ChatMessage {
            id: 3,
            room_id: "general".into(),
            sender_id: "1".into(),
            sender_username: "alice".into(),
            body: "ciphertext".into(),
            encrypted: true,
            created_at: Utc::now(),
        };

        match message.to_event("secret") {
            ServerEvent::NewMessage {
                id,
                message,
                message_type,
                encrypted,
                ..
            } => {
                assert_eq!(id, 3);
                assert_eq!(message, "secret");
                assert_eq!(message_type, "text");
                assert!(encrypted);
            }
            other => panic!("Expected NewMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_message_wire_names() {
        let message = ChatMessage {
            id: 1,
            room_id: "general".into(),
            sender_id: "1".into(),
            sender_username: "alice".into(),
            body: "hi".into(),
            encrypted: false,
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["user_id"], "1");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["message"], "hi");
        assert!(value.get("timestamp").is_some());
    }
}
