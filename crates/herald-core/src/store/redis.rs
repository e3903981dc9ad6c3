//! Redis-backed presence store.
//!
//! Each user's record is a JSON string under `presence:<username>`. The
//! multiplexed connection is cloned per call; clones share one socket.

use super::{PresenceStore, StoreError};
use crate::presence::{presence_key, PresenceRecord};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{info, trace};

/// Presence store on a shared Redis instance.
#[derive(Clone)]
pub struct RedisPresenceStore {
    connection: MultiplexedConnection,
}

impl RedisPresenceStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379/1`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis presence store");
        Ok(Self { connection })
    }

    /// Wrap an existing connection.
    #[must_use]
    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    /// Round-trip a PING to check the server is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn load(&self, username: &str) -> Result<Option<PresenceRecord>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(presence_key(username))
            .query_async(&mut conn)
            .await?;
        value
            .map(|json| PresenceRecord::from_json(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let key = record.key();
        trace!(key = %key, "Saving presence record");
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(record.to_json()?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, username: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(presence_key(username))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
