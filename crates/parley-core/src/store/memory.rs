//! In-memory store backend.

use super::tables::Tables;
use super::{NewMessage, NewRoom, NewUser, Room, Store, StoreError, UserRecord};
use crate::message::ChatMessage;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// A [`Store`] holding everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages across all rooms.
    pub async fn message_count(&self) -> usize {
        self.tables.lock().await.message_count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        let mut tables = self.tables.lock().await;
        let message = tables.build_message(message);
        tables.insert_message(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self.tables.lock().await.list_messages(room_id, limit))
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.tables.lock().await.rooms())
    }

    async fn create_room(&self, room: NewRoom) -> Result<Room, StoreError> {
        let mut tables = self.tables.lock().await;
        let room = tables.build_room(room);
        tables.insert_room(room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.tables.lock().await.room(room_id))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut tables = self.tables.lock().await;
        let user = tables.build_user(user)?;
        tables.insert_user(user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.tables.lock().await.user(user_id))
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.tables.lock().await.user_by_username(username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_get_distinct_ids() {
        let store = Arc::new(MemoryStore::new());

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_message(NewMessage {
                            room_id: "general".into(),
                            sender_id: "1".into(),
                            sender_username: "alice".into(),
                            body: format!("message {i}"),
                            encrypted: false,
                        })
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=64).collect::<Vec<u64>>());

        let listed: Vec<_> = store
            .list_messages("general", 64)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_rooms_and_users() {
        let store = MemoryStore::new();

        let room = store
            .create_room(NewRoom {
                name: "General".into(),
                description: "Main chat room".into(),
                created_by: "system".into(),
                is_private: false,
            })
            .await
            .unwrap();
        assert_eq!(store.get_room(&room.id).await.unwrap(), Some(room.clone()));
        assert_eq!(store.list_rooms().await.unwrap(), vec![room]);

        let user = store
            .create_user(NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
                password_hash: "hash".into(),
            })
            .await
            .unwrap();
        assert_eq!(store.get_user(&user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(
            store.find_user_by_username("alice").await.unwrap(),
            Some(user)
        );
        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
    }
}
