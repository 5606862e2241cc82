//! # parley-core
//!
//! Room and session coordination for the Parley chat service.
//!
//! - **Presence** - which users hold at least one open connection
//! - **Broadcaster** - room membership and per-connection outboxes
//! - **Pipeline** - validate, encrypt, persist and publish chat messages
//! - **Session** - the per-connection state machine
//! - **Store / Crypto / Auth** - collaborator traits with shipped backends
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────┐
//! │   Session   │────▶│  Pipeline   │────▶│ Broadcaster │────▶│ Outbox  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────┘
//!        │                   │                   │
//!        ▼                   ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Auth     │     │Crypto, Store│     │  Presence   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod auth;
pub mod broadcaster;
pub mod crypto;
pub mod error;
pub mod hub;
pub mod message;
pub mod pipeline;
pub mod presence;
pub mod session;
pub mod store;

pub use auth::{Auth, AuthError, Claims, Identity, JwtAuth};
pub use broadcaster::{BroadcasterStats, Outbox, RoomBroadcaster};
pub use crypto::{AesGcmCrypto, Crypto, CryptoError};
pub use error::ChatError;
pub use hub::Hub;
pub use message::{ChatMessage, ConnectionHandle, MessageId, RoomId, UserId};
pub use pipeline::{MessagePipeline, PipelineConfig};
pub use presence::PresenceRegistry;
pub use session::{ConnectionSession, SessionState};
pub use store::{FileStore, MemoryStore, Store, StoreError};
