//! Shared server state and startup wiring.

use crate::config::{Config, StorageBackend};
use anyhow::{Context, Result};
use chrono::Duration;
use parley_core::store::NewRoom;
use parley_core::{
    AesGcmCrypto, FileStore, Hub, JwtAuth, MemoryStore, PipelineConfig, Store, StoreError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Rooms created on first start: name, description.
const DEFAULT_ROOMS: [(&str, &str); 3] = [
    ("General", "Main chat room for everyone"),
    ("Random", "Casual conversations"),
    ("Tech Talk", "Discuss technology and programming"),
];

/// Shared server state.
pub struct AppState {
    /// Core components.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    /// Open WebSocket connections.
    connections: AtomicUsize,
}

impl AppState {
    /// Create state around an existing hub.
    #[must_use]
    pub fn new(config: Config, hub: Hub) -> Self {
        Self {
            hub,
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Open the configured store, wire up the hub and seed default rooms.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or seeded.
    pub async fn build(config: Config) -> Result<Self> {
        let store: Arc<dyn Store> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::File => Arc::new(
                FileStore::open(&config.storage.data_dir)
                    .await
                    .with_context(|| {
                        format!("Failed to open store in {}", config.storage.data_dir.display())
                    })?,
            ),
        };

        let seeded = seed_default_rooms(store.as_ref())
            .await
            .context("Failed to seed default rooms")?;
        if seeded > 0 {
            info!(rooms = seeded, "Seeded default rooms");
        }

        let crypto = Arc::new(AesGcmCrypto::from_passphrase(&config.encryption.key));
        let auth = Arc::new(JwtAuth::with_ttl(
            &config.auth.jwt_secret,
            Duration::hours(config.auth.token_ttl_hours),
        ));
        let hub = Hub::with_config(
            store,
            crypto,
            auth,
            PipelineConfig {
                max_history: config.limits.max_history,
            },
        );

        Ok(Self::new(config, hub))
    }

    /// Reserve a connection slot. Returns `false` when at capacity.
    pub fn try_acquire_connection(&self) -> bool {
        let max = self.config.limits.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    /// Release a slot taken by [`AppState::try_acquire_connection`].
    pub fn release_connection(&self) {
        self.connections.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }
}

/// Create the default rooms when the store has none.
///
/// Returns the number of rooms created.
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn seed_default_rooms(store: &dyn Store) -> Result<usize, StoreError> {
    if !store.list_rooms().await?.is_empty() {
        return Ok(0);
    }

    for (name, description) in DEFAULT_ROOMS {
        store
            .create_room(NewRoom {
                name: name.to_string(),
                description: description.to_string(),
                created_by: "system".to_string(),
                is_private: false,
            })
            .await?;
    }
    Ok(DEFAULT_ROOMS.len())
}
