//! Connection registry.
//!
//! The registry groups live connections by device identity so an event can be
//! fanned out to every connection currently representing that device. It is
//! process-local and rebuilt from connect events; nothing here is persisted.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::group::{Group, GroupName};
use dashmap::{DashMap, DashSet};
use herald_protocol::ServerEvent;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Narrow interface the presence manager and message router use.
///
/// All operations are in-process and never block on I/O. An empty group is a
/// routing signal, never an error.
pub trait ConnectionRegistry: Send + Sync {
    /// Add a connection to a group. Re-joining the same group is a no-op.
    ///
    /// Returns `true` if the connection was newly added.
    fn join(&self, connection: &ConnectionHandle, group: &str) -> bool;

    /// Remove a connection from a group.
    ///
    /// Returns `true` if the connection was a member.
    fn leave(&self, connection_id: &ConnectionId, group: &str) -> bool;

    /// Remove a connection from every group it joined.
    ///
    /// Returns the groups it left.
    fn leave_all(&self, connection_id: &ConnectionId) -> Vec<GroupName>;

    /// Number of live connections in a group; `0` means not currently live.
    fn size_of(&self, group: &str) -> usize;

    /// Deliver an event to every live connection in a group.
    ///
    /// Returns the number of connections reached.
    fn multicast(&self, group: &str, event: ServerEvent) -> usize;

    /// Registry statistics.
    fn stats(&self) -> RegistryStats;
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of non-empty groups.
    pub group_count: usize,
    /// Number of connections that joined at least one group.
    pub connection_count: usize,
    /// Total group memberships.
    pub total_memberships: usize,
}

/// In-process registry backed by concurrent maps.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    /// Groups indexed by name.
    groups: DashMap<GroupName, Group>,
    /// Connection memberships (connection id -> group names).
    memberships: DashMap<ConnectionId, DashSet<GroupName>>,
}

impl LocalRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        info!("Creating local connection registry");
        Self::default()
    }

    /// Check if a group exists.
    #[must_use]
    pub fn group_exists(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Groups a connection belongs to.
    #[must_use]
    pub fn connection_groups(&self, connection_id: &ConnectionId) -> Vec<GroupName> {
        self.memberships
            .get(connection_id)
            .map(|s| s.iter().map(|g| g.clone()).collect())
            .unwrap_or_default()
    }

    fn remove_member(&self, connection_id: &ConnectionId, group: &str) -> bool {
        let Some(mut entry) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = entry.leave(connection_id);
        if entry.is_empty() {
            drop(entry);
            self.groups.remove_if(group, |_, g| g.is_empty());
            debug!(group = %group, "Deleted empty group");
        }
        removed
    }
}

impl ConnectionRegistry for LocalRegistry {
    fn join(&self, connection: &ConnectionHandle, group: &str) -> bool {
        let added = self
            .groups
            .entry(group.to_string())
            .or_insert_with(|| {
                debug!(group = %group, "Creating new group");
                Group::new(group)
            })
            .join(connection);

        self.memberships
            .entry(connection.id().clone())
            .or_default()
            .insert(group.to_string());

        if added {
            debug!(
                group = %group,
                connection = %connection.id(),
                members = self.size_of(group),
                "Joined"
            );
        }
        added
    }

    fn leave(&self, connection_id: &ConnectionId, group: &str) -> bool {
        if let Some(groups) = self.memberships.get(connection_id) {
            groups.remove(group);
            let now_empty = groups.is_empty();
            drop(groups);
            if now_empty {
                self.memberships.remove_if(connection_id, |_, g| g.is_empty());
            }
        }
        self.remove_member(connection_id, group)
    }

    fn leave_all(&self, connection_id: &ConnectionId) -> Vec<GroupName> {
        let Some((_, groups)) = self.memberships.remove(connection_id) else {
            return Vec::new();
        };

        let left: Vec<GroupName> = groups.into_iter().collect();
        for group in &left {
            self.remove_member(connection_id, group);
        }

        debug!(connection = %connection_id, groups = left.len(), "Left all groups");
        left
    }

    fn size_of(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map(|g| g.live_count())
            .unwrap_or(0)
    }

    fn multicast(&self, group: &str, event: ServerEvent) -> usize {
        let Some(entry) = self.groups.get(group) else {
            trace!(group = %group, event = event.name(), "Multicast to empty group");
            return 0;
        };
        let count = entry.multicast(&Arc::new(event));
        trace!(group = %group, recipients = count, "Multicast");
        count
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            group_count: self.groups.len(),
            connection_count: self.memberships.len(),
            total_memberships: self.memberships.iter().map(|s| s.len()).sum(),
        }
    }
}
