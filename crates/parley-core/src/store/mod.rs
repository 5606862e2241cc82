//! Durable storage for users, rooms and messages.
//!
//! The core only talks to the [`Store`] trait. Two backends ship with it:
//! [`MemoryStore`] for tests and ephemeral deployments, and [`FileStore`],
//! an append-only JSON-lines log replayed on open.

mod file;
mod memory;
mod tables;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::message::{ChatMessage, RoomId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_protocol::UserIdentity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violated.
    #[error("{0}")]
    Conflict(String),

    /// I/O error from a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message to be appended; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub body: String,
    pub encrypted: bool,
}

/// A stored user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Public identity of this user.
    #[must_use]
    pub fn identity(&self) -> UserIdentity {
        UserIdentity::new(self.id.clone(), self.username.clone(), self.avatar.clone())
    }
}

/// A user to be created. The password must already be hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// A chat room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub is_private: bool,
}

/// A room to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub is_private: bool,
}

/// Default avatar for a new user.
#[must_use]
pub fn default_avatar(username: &str) -> String {
    format!("https://ui-avatars.com/api/?name={username}&background=4F46E5&color=fff")
}

/// Record storage consumed by the core.
///
/// `append_message` must assign ids atomically: concurrent appends never
/// share an id and ids strictly increase in insertion order.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a message, assigning its id and timestamp.
    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage, StoreError>;

    /// The most recent `limit` messages of a room, oldest first.
    async fn list_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// All rooms in creation order.
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Create a room.
    async fn create_room(&self, room: NewRoom) -> Result<Room, StoreError>;

    /// Look up a room by id.
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, StoreError>;

    /// Create a user. Fails with `Conflict` on a duplicate username or email.
    async fn create_user(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    /// Look up a user by id.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Look up a user by username.
    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, StoreError>;
}
