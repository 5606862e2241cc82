//! The path every chat message takes: validate, encrypt, persist, publish.

use crate::broadcaster::RoomBroadcaster;
use crate::crypto::Crypto;
use crate::error::ChatError;
use crate::message::ChatMessage;
use crate::store::{NewMessage, Store};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default cap on messages returned by a history read.
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Message pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound for `history` limits.
    pub max_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

/// Persists chat messages and publishes them to their room.
pub struct MessagePipeline {
    store: Arc<dyn Store>,
    crypto: Arc<dyn Crypto>,
    broadcaster: Arc<RoomBroadcaster>,
    config: PipelineConfig,
}

impl MessagePipeline {
    /// Create a pipeline with the default configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        crypto: Arc<dyn Crypto>,
        broadcaster: Arc<RoomBroadcaster>,
    ) -> Self {
        Self::with_config(store, crypto, broadcaster, PipelineConfig::default())
    }

    /// Create a pipeline with custom configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn Store>,
        crypto: Arc<dyn Crypto>,
        broadcaster: Arc<RoomBroadcaster>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            crypto,
            broadcaster,
            config,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Persist a message and broadcast it to the room.
    ///
    /// The returned message carries the body as stored (ciphertext when
    /// encrypted). Room members receive the plaintext.
    ///
    /// # Errors
    ///
    /// - [`ChatError::Validation`] if any argument is empty.
    /// - [`ChatError::Encryption`] if encryption was requested and failed.
    /// - [`ChatError::Persistence`] if the store rejected the write.
    ///
    /// On error nothing is broadcast.
    pub async fn submit(
        &self,
        room_id: &str,
        sender_id: &str,
        sender_username: &str,
        body: &str,
        request_encrypt: bool,
    ) -> Result<ChatMessage, ChatError> {
        validate("room_id", room_id)?;
        validate("user_id", sender_id)?;
        validate("username", sender_username)?;
        validate("message", body)?;

        let stored_body = if request_encrypt {
            self.crypto.encrypt(body)?
        } else {
            body.to_string()
        };

        let message = self
            .store
            .append_message(NewMessage {
                room_id: room_id.to_string(),
                sender_id: sender_id.to_string(),
                sender_username: sender_username.to_string(),
                body: stored_body,
                encrypted: request_encrypt,
            })
            .await?;

        let published = self.reveal(&message);
        let delivered = self.broadcaster.broadcast(room_id, message.to_event(published));

        debug!(
            room = %room_id,
            id = message.id,
            encrypted = message.encrypted,
            recipients = delivered,
            "Message published"
        );
        Ok(message)
    }

    /// The most recent messages of a room, oldest first, decrypted.
    ///
    /// `limit` is clamped to the configured maximum.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Persistence`] if the store read fails.
    pub async fn history(&self, room_id: &str, limit: usize) -> Result<Vec<ChatMessage>, ChatError> {
        let limit = limit.min(self.config.max_history);
        let messages = self.store.list_messages(room_id, limit).await?;

        Ok(messages
            .into_iter()
            .map(|message| {
                let body = self.reveal(&message);
                message.with_body(body)
            })
            .collect())
    }

    /// Plaintext of a stored body. Undecryptable bodies are returned as
    /// stored.
    fn reveal(&self, message: &ChatMessage) -> String {
        if !message.encrypted {
            return message.body.clone();
        }
        match self.crypto.decrypt(&message.body) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(id = message.id, room = %message.room_id, error = %e, "Publishing undecryptable body as stored");
                message.body.clone()
            }
        }
    }
}

fn validate(field: &str, value: &str) -> Result<(), ChatError> {
    if value.is_empty() {
        return Err(ChatError::Validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{AesGcmCrypto, CryptoError};
    use crate::message::ConnectionHandle;
    use crate::presence::PresenceRegistry;
    use crate::store::{MemoryStore, NewRoom, NewUser, Room, StoreError, UserRecord};
    use async_trait::async_trait;
    use parley_protocol::{ServerEvent, UserIdentity};

    /// Crypto whose encryption always fails.
    struct BrokenCrypto;

    impl Crypto for BrokenCrypto {
        fn encrypt(&self, _plaintext: &str) -> Result<String, CryptoError> {
            Err(CryptoError::Encrypt("no key".into()))
        }

        fn decrypt(&self, _ciphertext: &str) -> Result<String, CryptoError> {
            Err(CryptoError::Decrypt("no key".into()))
        }
    }

    /// Crypto that encrypts but can never decrypt.
    struct OneWayCrypto;

    impl Crypto for OneWayCrypto {
        fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
            Ok(format!("sealed:{}", plaintext.len()))
        }

        fn decrypt(&self, _ciphertext: &str) -> Result<String, CryptoError> {
            Err(CryptoError::Decrypt("authentication tag mismatch".into()))
        }
    }

    /// Store that rejects every write.
    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn append_message(&self, _message: NewMessage) -> Result<ChatMessage, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        async fn list_messages(&self, _room_id: &str, _limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }

        async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
            Ok(Vec::new())
        }

        async fn create_room(&self, _room: NewRoom) -> Result<Room, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        async fn get_room(&self, _room_id: &str) -> Result<Option<Room>, StoreError> {
            Ok(None)
        }

        async fn create_user(&self, _user: NewUser) -> Result<UserRecord, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        async fn get_user(&self, _user_id: &str) -> Result<Option<UserRecord>, StoreError> {
            Ok(None)
        }

        async fn find_user_by_username(&self, _username: &str) -> Result<Option<UserRecord>, StoreError> {
            Ok(None)
        }
    }

    struct Fixture {
        pipeline: MessagePipeline,
        store: Arc<MemoryStore>,
        outbox: crate::broadcaster::Outbox,
    }

    fn fixture(crypto: Arc<dyn Crypto>) -> Fixture {
        let broadcaster = Arc::new(RoomBroadcaster::new(Arc::new(PresenceRegistry::new())));
        let listener = ConnectionHandle::from("listener");
        let mut outbox = broadcaster.connect(&listener);
        broadcaster.join("general", &listener, &UserIdentity::new("9", "listener", ""));
        while outbox.try_recv().is_ok() {}

        let store = Arc::new(MemoryStore::new());
        Fixture {
            pipeline: MessagePipeline::new(store.clone(), crypto, broadcaster),
            store,
            outbox,
        }
    }

    #[tokio::test]
    async fn test_submit_plain() {
        let mut f = fixture(Arc::new(AesGcmCrypto::new([1u8; 32])));

        let message = f
            .pipeline
            .submit("general", "1", "alice", "hello", false)
            .await
            .unwrap();
        assert_eq!(message.body, "hello");
        assert!(!message.encrypted);

        let event = f.outbox.try_recv().unwrap();
        match &*event {
            ServerEvent::NewMessage { id, message: body, username, .. } => {
                assert_eq!(*id, message.id);
                assert_eq!(body, "hello");
                assert_eq!(username, "alice");
            }
            other => panic!("Expected NewMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_encrypted_publishes_plaintext() {
        let mut f = fixture(Arc::new(AesGcmCrypto::from_passphrase("k")));

        let message = f
            .pipeline
            .submit("general", "1", "alice", "secret", true)
            .await
            .unwrap();
        assert!(message.encrypted);
        assert_ne!(message.body, "secret");

        match &*f.outbox.try_recv().unwrap() {
            ServerEvent::NewMessage { message: body, encrypted, .. } => {
                assert_eq!(body, "secret");
                assert!(*encrypted);
            }
            other => panic!("Expected NewMessage, got {:?}", other),
        }

        let history = f.pipeline.history("general", 10).await.unwrap();
        assert_eq!(history[0].body, "secret");
    }

    #[tokio::test]
    async fn test_validation_has_no_side_effects() {
        let mut f = fixture(Arc::new(AesGcmCrypto::new([1u8; 32])));

        for (room, user, name, body) in [
            ("", "1", "alice", "hi"),
            ("general", "", "alice", "hi"),
            ("general", "1", "", "hi"),
            ("general", "1", "alice", ""),
        ] {
            let result = f.pipeline.submit(room, user, name, body, false).await;
            assert!(matches!(result, Err(ChatError::Validation(_))));
        }

        assert_eq!(f.store.message_count().await, 0);
        assert!(f.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_encryption_failure_persists_nothing() {
        let mut f = fixture(Arc::new(BrokenCrypto));

        let result = f.pipeline.submit("general", "1", "alice", "secret", true).await;
        assert!(matches!(result, Err(ChatError::Encryption(_))));
        assert_eq!(f.store.message_count().await, 0);
        assert!(f.outbox.try_recv().is_err());

        // Plain messages do not touch crypto.
        assert!(f.pipeline.submit("general", "1", "alice", "hi", false).await.is_ok());
    }

    #[tokio::test]
    async fn test_decrypt_failure_publishes_ciphertext() {
        let mut f = fixture(Arc::new(OneWayCrypto));

        let message = f
            .pipeline
            .submit("general", "1", "alice", "secret", true)
            .await
            .unwrap();

        match &*f.outbox.try_recv().unwrap() {
            ServerEvent::NewMessage { message: body, .. } => assert_eq!(body, &message.body),
            other => panic!("Expected NewMessage, got {:?}", other),
        }

        let history = f.pipeline.history("general", 10).await.unwrap();
        assert_eq!(history[0].body, "sealed:6");
    }

    #[tokio::test]
    async fn test_store_failure_is_not_broadcast() {
        let broadcaster = Arc::new(RoomBroadcaster::new(Arc::new(PresenceRegistry::new())));
        let handle = ConnectionHandle::from("listener");
        let mut outbox = broadcaster.connect(&handle);
        broadcaster.join("general", &handle, &UserIdentity::new("9", "listener", ""));
        while outbox.try_recv().is_ok() {}

        let pipeline = MessagePipeline::new(
            Arc::new(FailingStore),
            Arc::new(AesGcmCrypto::new([1u8; 32])),
            broadcaster,
        );

        let result = pipeline.submit("general", "1", "alice", "hi", false).await;
        assert!(matches!(result, Err(ChatError::Persistence(_))));
        assert!(outbox.try_recv().is_err());

        assert!(matches!(
            pipeline.history("general", 10).await,
            Err(ChatError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn test_history_limit_is_clamped() {
        let broadcaster = Arc::new(RoomBroadcaster::new(Arc::new(PresenceRegistry::new())));
        let pipeline = MessagePipeline::with_config(
            Arc::new(MemoryStore::new()),
            Arc::new(AesGcmCrypto::new([1u8; 32])),
            broadcaster,
            PipelineConfig { max_history: 3 },
        );

        for i in 0..5 {
            pipeline
                .submit("general", "1", "alice", &format!("m{i}"), false)
                .await
                .unwrap();
        }

        let history = pipeline.history("general", 50).await.unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m2", "m3", "m4"]);
        assert!(pipeline.history("general", 0).await.unwrap().is_empty());
    }
}
