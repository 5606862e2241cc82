//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat service.
//!
//! Clients and the server exchange tagged events, one per WebSocket text
//! frame as JSON, or length-prefixed MessagePack in binary frames.
//!
//! ## Events
//!
//! - `ClientEvent` - `authenticate`, `join_room`, `leave_room`, `send_message`, `typing`
//! - `ServerEvent` - `connected`, `user_joined`, `online_users`, `user_left`,
//!   `new_message`, `user_typing`, `user_offline`, `error`
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::typing("general", "alice", true);
//!
//! let text = codec::to_json(&event).unwrap();
//! let decoded: ClientEvent = codec::from_json(&text).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use events::{ClientEvent, ClientEventType, ServerEvent, UserIdentity, MESSAGE_TYPE_TEXT};
pub use version::{Version, PROTOCOL_VERSION};
