//! Store abstractions.
//!
//! Two stores back the engine:
//!
//! - an **ephemeral presence store** holding one [`PresenceRecord`] per user,
//!   keyed by [`presence_key`](crate::presence::presence_key);
//! - a **durable message store** holding [`QueuedMessage`] rows for devices
//!   that were offline when a message was routed.
//!
//! Both are shared across connections and possibly across processes. Retries
//! and backoff belong to the client implementations, not to the callers here.

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::identity::UserId;
use crate::presence::PresenceRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{MemoryMessageStore, MemoryPresenceStore};

#[cfg(feature = "redis")]
pub use self::redis::RedisPresenceStore;

#[cfg(feature = "sqlite")]
pub use self::sqlite::{SqliteDirectory, SqliteMessageStore};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row is not in the expected shape.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Redis command failure.
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// SQLite query failure.
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),
}

/// Identifier of a queued message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a new random ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an ID read back from a store.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message waiting for its target device to reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    /// Platform the message was addressed to.
    pub recipient_agent: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub delivered: bool,
}

impl QueuedMessage {
    /// Create an undelivered message stamped with the current time.
    #[must_use]
    pub fn new(
        sender_id: impl Into<UserId>,
        recipient_id: impl Into<UserId>,
        recipient_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            recipient_agent: recipient_agent.into(),
            content: content.into(),
            timestamp: Utc::now(),
            delivered: false,
        }
    }
}

/// Ephemeral per-user presence state.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Load a user's record, if any.
    async fn load(&self, username: &str) -> Result<Option<PresenceRecord>, StoreError>;

    /// Write a user's record, replacing what was there.
    async fn save(&self, record: &PresenceRecord) -> Result<(), StoreError>;

    /// Delete a user's record.
    ///
    /// Returns `true` if a record existed.
    async fn remove(&self, username: &str) -> Result<bool, StoreError>;
}

/// Durable queue of undelivered messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message.
    async fn enqueue(&self, message: &QueuedMessage) -> Result<(), StoreError>;

    /// Undelivered messages for one device identity, oldest first.
    async fn pending(
        &self,
        recipient_id: &str,
        recipient_agent: &str,
    ) -> Result<Vec<QueuedMessage>, StoreError>;

    /// Delete a batch of messages in one operation.
    ///
    /// Returns the number of rows removed.
    async fn delete_many(&self, ids: &[MessageId]) -> Result<u64, StoreError>;
}
