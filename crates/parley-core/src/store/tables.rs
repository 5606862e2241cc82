//! In-memory record tables shared by the store backends.
//!
//! Writes are split into `build_*` (validate and assign ids, no mutation)
//! and `insert_*` (commit), so a backend can persist the built record
//! before committing it.

use super::{NewMessage, NewRoom, NewUser, Room, StoreError, UserRecord, default_avatar};
use crate::message::{ChatMessage, MessageId, RoomId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub(crate) struct Tables {
    users: Vec<UserRecord>,
    rooms: Vec<Room>,
    messages: HashMap<RoomId, Vec<ChatMessage>>,
    last_message_id: MessageId,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Tables {
    pub(crate) fn build_message(&self, new: NewMessage) -> ChatMessage {
        // Clock steps backwards must not reorder history.
        let now = Utc::now();
        let created_at = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };

        ChatMessage {
            id: self.last_message_id + 1,
            room_id: new.room_id,
            sender_id: new.sender_id,
            sender_username: new.sender_username,
            body: new.body,
            encrypted: new.encrypted,
            created_at,
        }
    }

    pub(crate) fn insert_message(&mut self, message: ChatMessage) {
        self.last_message_id = self.last_message_id.max(message.id);
        self.last_timestamp = Some(match self.last_timestamp {
            Some(last) => last.max(message.created_at),
            None => message.created_at,
        });
        self.messages
            .entry(message.room_id.clone())
            .or_default()
            .push(message);
    }

    pub(crate) fn list_messages(&self, room_id: &str, limit: usize) -> Vec<ChatMessage> {
        self.messages
            .get(room_id)
            .map(|messages| {
                let start = messages.len().saturating_sub(limit);
                messages[start..].to_vec()
            })
            .unwrap_or_default()
    }

    pub(crate) fn message_count(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    pub(crate) fn build_room(&self, new: NewRoom) -> Room {
        Room {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            description: new.description,
            created_by: new.created_by,
            created_at: Utc::now(),
            is_private: new.is_private,
        }
    }

    pub(crate) fn insert_room(&mut self, room: Room) {
        self.rooms.push(room);
    }

    pub(crate) fn rooms(&self) -> Vec<Room> {
        self.rooms.clone()
    }

    pub(crate) fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.iter().find(|r| r.id == room_id).cloned()
    }

    pub(crate) fn build_user(&self, new: NewUser) -> Result<UserRecord, StoreError> {
        if self.users.iter().any(|u| u.username == new.username) {
            return Err(StoreError::Conflict("Username already exists".into()));
        }
        if self.users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::Conflict("Email already exists".into()));
        }

        Ok(UserRecord {
            id: Uuid::new_v4().to_string(),
            avatar: default_avatar(&new.username),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            created_at: Utc::now(),
        })
    }

    pub(crate) fn insert_user(&mut self, user: UserRecord) {
        self.users.push(user);
    }

    pub(crate) fn user(&self, user_id: &str) -> Option<UserRecord> {
        self.users.iter().find(|u| u.id == user_id).cloned()
    }

    pub(crate) fn user_by_username(&self, username: &str) -> Option<UserRecord> {
        self.users.iter().find(|u| u.username == username).cloned()
    }
}
