//! Presence tracking for Parley.
//!
//! Presence maps each online user to the connections they currently hold.
//! A user with several tabs open has several handles; the user goes offline
//! only when the last one closes.

use crate::message::{ConnectionHandle, UserId};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Registry of online users and their connection handles.
///
/// Operations on unknown handles are no-ops; disconnect races are expected.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// User ID -> handles held by that user.
    users: DashMap<UserId, HashSet<ConnectionHandle>>,
    /// Handle -> owning user. A handle belongs to at most one user.
    handles: DashMap<ConnectionHandle, UserId>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under a user.
    ///
    /// Returns `true` if the user was offline before this call.
    pub fn mark_online(&self, user_id: &str, handle: &ConnectionHandle) -> bool {
        if let Some(previous) = self.handles.insert(handle.clone(), user_id.to_string()) {
            if previous == user_id {
                return false;
            }
            self.detach(&previous, handle);
        }

        let mut handles = self.users.entry(user_id.to_string()).or_default();
        let came_online = handles.is_empty();
        handles.insert(handle.clone());

        if came_online {
            debug!(user = %user_id, connection = %handle, "Presence: user online");
        }
        came_online
    }

    /// Remove a handle.
    ///
    /// Returns the user id if this was the user's last handle.
    pub fn mark_offline(&self, handle: &ConnectionHandle) -> Option<UserId> {
        let (_, user_id) = self.handles.remove(handle)?;

        if self.detach(&user_id, handle) {
            debug!(user = %user_id, connection = %handle, "Presence: user offline");
            Some(user_id)
        } else {
            None
        }
    }

    /// Remove `handle` from the user's set; `true` if the set became empty
    /// and the user was dropped.
    fn detach(&self, user_id: &str, handle: &ConnectionHandle) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut handles) => {
                handles.remove(handle);
            }
            None => return false,
        }
        self.users
            .remove_if(user_id, |_, handles| handles.is_empty())
            .is_some()
    }

    /// Check if a user has at least one connection.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|handles| !handles.is_empty())
    }

    /// Snapshot of online users.
    #[must_use]
    pub fn online_users(&self) -> BTreeSet<UserId> {
        self.users
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// The user a handle is registered under.
    #[must_use]
    pub fn user_of(&self, handle: &ConnectionHandle) -> Option<UserId> {
        self.handles.get(handle).map(|user| user.clone())
    }

    /// Number of handles a user holds.
    #[must_use]
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.users.get(user_id).map_or(0, |handles| handles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_online_offline() {
        let presence = PresenceRegistry::new();
        let conn = ConnectionHandle::from("conn-1");

        assert!(presence.mark_online("alice", &conn));
        assert!(!presence.mark_online("alice", &conn)); // Already registered
        assert!(presence.is_online("alice"));
        assert_eq!(presence.connection_count("alice"), 1);

        assert_eq!(presence.mark_offline(&conn), Some("alice".to_string()));
        assert!(!presence.is_online("alice"));
        assert!(presence.online_users().is_empty());
    }

    #[test]
    fn test_multiple_tabs() {
        let presence = PresenceRegistry::new();
        let tab1 = ConnectionHandle::from("conn-1");
        let tab2 = ConnectionHandle::from("conn-2");

        assert!(presence.mark_online("alice", &tab1));
        assert!(!presence.mark_online("alice", &tab2));

        assert_eq!(presence.mark_offline(&tab1), None);
        assert!(presence.is_online("alice"));
        assert_eq!(presence.mark_offline(&tab2), Some("alice".to_string()));
    }

    #[test]
    fn test_handle_moves_between_users() {
        let presence = PresenceRegistry::new();
        let conn = ConnectionHandle::from("conn-1");

        presence.mark_online("alice", &conn);
        assert!(presence.mark_online("bob", &conn));

        assert!(!presence.is_online("alice"));
        assert_eq!(presence.user_of(&conn), Some("bob".to_string()));
    }

    #[test]
    fn test_unknown_handle_is_noop() {
        let presence = PresenceRegistry::new();
        assert_eq!(presence.mark_offline(&ConnectionHandle::from("ghost")), None);
        assert_eq!(presence.user_of(&ConnectionHandle::from("ghost")), None);
    }

    #[test]
    fn test_snapshot() {
        let presence = PresenceRegistry::new();
        presence.mark_online("bob", &ConnectionHandle::from("conn-2"));
        presence.mark_online("alice", &ConnectionHandle::from("conn-1"));

        let online: Vec<_> = presence.online_users().into_iter().collect();
        assert_eq!(online, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_concurrent_tabs_settle_offline() {
        let presence = Arc::new(PresenceRegistry::new());

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let presence = presence.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let conn = ConnectionHandle::new(format!("conn-{t}-{i}"));
                        presence.mark_online("alice", &conn);
                        presence.mark_offline(&conn);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert!(!presence.is_online("alice"));
        assert_eq!(presence.connection_count("alice"), 0);
    }
}
