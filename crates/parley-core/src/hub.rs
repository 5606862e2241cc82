//! Shared components handed to every connection.

use crate::auth::{Auth, Identity};
use crate::broadcaster::{Outbox, RoomBroadcaster};
use crate::crypto::Crypto;
use crate::message::ConnectionHandle;
use crate::pipeline::{MessagePipeline, PipelineConfig};
use crate::presence::PresenceRegistry;
use crate::session::ConnectionSession;
use crate::store::Store;
use parley_protocol::{ServerEvent, PROTOCOL_VERSION};
use std::sync::Arc;
use tracing::debug;

/// Bundle of the presence registry, broadcaster, pipeline and collaborators.
///
/// Cloning is cheap; every clone shares the same state.
#[derive(Clone)]
pub struct Hub {
    presence: Arc<PresenceRegistry>,
    broadcaster: Arc<RoomBroadcaster>,
    pipeline: Arc<MessagePipeline>,
    auth: Arc<dyn Auth>,
    store: Arc<dyn Store>,
}

impl Hub {
    /// Wire up a hub with the default pipeline configuration.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, crypto: Arc<dyn Crypto>, auth: Arc<dyn Auth>) -> Self {
        Self::with_config(store, crypto, auth, PipelineConfig::default())
    }

    /// Wire up a hub with a custom pipeline configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn Store>,
        crypto: Arc<dyn Crypto>,
        auth: Arc<dyn Auth>,
        config: PipelineConfig,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let broadcaster = Arc::new(RoomBroadcaster::new(presence.clone()));
        let pipeline = Arc::new(MessagePipeline::with_config(
            store.clone(),
            crypto,
            broadcaster.clone(),
            config,
        ));

        Self {
            presence,
            broadcaster,
            pipeline,
            auth,
            store,
        }
    }

    /// Open a session for a new connection.
    ///
    /// `identity` is set when the transport already verified a token. The
    /// outbox receives a `connected` greeting first.
    #[must_use]
    pub fn open_session(&self, identity: Option<Identity>) -> (ConnectionSession, Outbox) {
        let handle = ConnectionHandle::generate();
        let outbox = self.broadcaster.connect(&handle);

        self.broadcaster.send_to(
            &handle,
            ServerEvent::Connected {
                connection_id: handle.to_string(),
                version: PROTOCOL_VERSION.to_string(),
            },
        );

        debug!(
            connection = %handle,
            user = identity.as_ref().map(|i| i.user_id.as_str()).unwrap_or("-"),
            "Session opened"
        );
        (ConnectionSession::new(handle, identity, self.clone()), outbox)
    }

    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    #[must_use]
    pub fn broadcaster(&self) -> &Arc<RoomBroadcaster> {
        &self.broadcaster
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<MessagePipeline> {
        &self.pipeline
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<dyn Auth> {
        &self.auth
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
