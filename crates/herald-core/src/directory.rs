//! Contact and identity lookups.
//!
//! Accounts and contact requests are owned by other services. The engine only
//! asks two questions of them: "is this pair an accepted contact?" and "what
//! stable id does this name refer to?".

use crate::identity::UserId;
use crate::store::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Authorization check consulted before routing a message.
#[async_trait]
pub trait ContactGate: Send + Sync {
    /// Whether an accepted contact edge exists between the two users.
    async fn is_accepted_contact(&self, user_a: &str, user_b: &str) -> Result<bool, StoreError>;
}

/// Maps human-readable usernames to stable ids and back.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a username (or an id) to the stable user id.
    async fn resolve_username(&self, name_or_id: &str) -> Result<Option<UserId>, StoreError>;

    /// Reverse lookup of a stable id.
    async fn username_of(&self, user_id: &str) -> Result<Option<String>, StoreError>;
}

/// State of a contact edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Pending,
    Accepted,
}

impl ContactStatus {
    /// Stored representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Pending => "pending",
            ContactStatus::Accepted => "accepted",
        }
    }
}

impl FromStr for ContactStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ContactStatus::Pending),
            "accepted" => Ok(ContactStatus::Accepted),
            other => Err(StoreError::Corrupt(format!("unknown contact status {other:?}"))),
        }
    }
}

/// Directory for development deployments: every name is its own id and every
/// pair of users may message each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenDirectory;

#[async_trait]
impl ContactGate for OpenDirectory {
    async fn is_accepted_contact(&self, _user_a: &str, _user_b: &str) -> Result<bool, StoreError> {
        Ok(true)
    }
}

#[async_trait]
impl IdentityResolver for OpenDirectory {
    async fn resolve_username(&self, name_or_id: &str) -> Result<Option<UserId>, StoreError> {
        Ok(Some(name_or_id.to_string()))
    }

    async fn username_of(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(Some(user_id.to_string()))
    }
}

/// In-memory user and contact tables.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    /// user id -> username
    users: DashMap<UserId, String>,
    /// username -> user id
    by_name: DashMap<String, UserId>,
    /// (user id, friend id) -> status
    edges: DashMap<(UserId, UserId), ContactStatus>,
}

impl StaticDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub fn add_user(&self, user_id: impl Into<UserId>, username: impl Into<String>) {
        let (user_id, username) = (user_id.into(), username.into());
        self.by_name.insert(username.clone(), user_id.clone());
        self.users.insert(user_id, username);
    }

    /// Record a directed contact edge.
    pub fn set_contact(
        &self,
        user_id: impl Into<UserId>,
        friend_id: impl Into<UserId>,
        status: ContactStatus,
    ) {
        self.edges
            .insert((user_id.into(), friend_id.into()), status);
    }

    fn edge_accepted(&self, from: &str, to: &str) -> bool {
        self.edges
            .get(&(from.to_string(), to.to_string()))
            .is_some_and(|s| *s == ContactStatus::Accepted)
    }
}

#[async_trait]
impl ContactGate for StaticDirectory {
    async fn is_accepted_contact(&self, user_a: &str, user_b: &str) -> Result<bool, StoreError> {
        Ok(self.edge_accepted(user_a, user_b) || self.edge_accepted(user_b, user_a))
    }
}

#[async_trait]
impl IdentityResolver for StaticDirectory {
    async fn resolve_username(&self, name_or_id: &str) -> Result<Option<UserId>, StoreError> {
        if let Some(id) = self.by_name.get(name_or_id) {
            return Ok(Some(id.clone()));
        }
        Ok(self
            .users
            .contains_key(name_or_id)
            .then(|| name_or_id.to_string()))
    }

    async fn username_of(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.users.get(user_id).map(|name| name.clone()))
    }
}
