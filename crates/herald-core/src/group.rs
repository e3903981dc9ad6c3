//! Multicast groups.
//!
//! A group is the set of live connections currently representing one device
//! identity.

use crate::connection::{ConnectionHandle, ConnectionId};
use herald_protocol::ServerEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A group name, as produced by [`crate::identity::group_name`].
pub type GroupName = String;

/// The live connections sharing one device identity.
#[derive(Debug)]
pub struct Group {
    name: GroupName,
    members: HashMap<ConnectionId, ConnectionHandle>,
}

impl Group {
    /// Create an empty group.
    #[must_use]
    pub fn new(name: impl Into<GroupName>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    /// Get the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of members whose transport is still open.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.members.values().filter(|h| h.is_open()).count()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Add a connection.
    ///
    /// Returns `false` if it was already a member.
    pub fn join(&mut self, connection: &ConnectionHandle) -> bool {
        if self.members.contains_key(connection.id()) {
            return false;
        }
        self.members
            .insert(connection.id().clone(), connection.clone());
        debug!(group = %self.name, connection = %connection.id(), "Connection joined group");
        true
    }

    /// Remove a connection.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.members.remove(connection_id).is_some();
        if removed {
            debug!(group = %self.name, connection = %connection_id, "Connection left group");
        }
        removed
    }

    /// Deliver an event to every member.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn multicast(&self, event: &Arc<ServerEvent>) -> usize {
        trace!(group = %self.name, event = event.name(), "Multicasting");
        self.members
            .values()
            .filter(|h| h.send(Arc::clone(event)))
            .count()
    }

    /// Check if the group has no members at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of members, open or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_join_is_idempotent() {
        let mut group = Group::new("mona-phone");
        let (conn, _rx) = ConnectionHandle::channel("conn-1".into());

        assert!(group.join(&conn));
        assert!(!group.join(&conn));
        assert_eq!(group.len(), 1);
        assert!(group.contains(conn.id()));

        assert!(group.leave(conn.id()));
        assert!(!group.leave(conn.id()));
        assert!(group.is_empty());
    }

    #[test]
    fn test_group_multicast_skips_closed() {
        let mut group = Group::new("mona-phone");
        let (open, mut open_rx) = ConnectionHandle::channel("conn-1".into());
        let (closed, closed_rx) = ConnectionHandle::channel("conn-2".into());
        group.join(&open);
        group.join(&closed);
        drop(closed_rx);

        assert_eq!(group.live_count(), 1);

        let event = Arc::new(ServerEvent::status_changed("mona", "phone", "busy"));
        assert_eq!(group.multicast(&event), 1);
        assert_eq!(open_rx.try_recv().unwrap().name(), "status-changed");
    }
}
