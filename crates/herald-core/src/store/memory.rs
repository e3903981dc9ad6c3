//! In-memory stores.
//!
//! Used for tests and single-process deployments. The presence store keeps
//! serialized records under the same keys the Redis adapter uses.

use super::{MessageId, MessageStore, PresenceStore, QueuedMessage, StoreError};
use crate::presence::{presence_key, PresenceRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::trace;

fn outage(flag: &AtomicBool, store: &str) -> Result<(), StoreError> {
    if flag.load(Ordering::Relaxed) {
        return Err(StoreError::Unavailable(format!("{store} is offline")));
    }
    Ok(())
}

/// Presence store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    records: DashMap<String, String>,
    unavailable: AtomicBool,
}

impl MemoryPresenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Raw stored value for a key.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.records.get(key).map(|v| v.clone())
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn load(&self, username: &str) -> Result<Option<PresenceRecord>, StoreError> {
        outage(&self.unavailable, "presence store")?;
        self.records
            .get(&presence_key(username))
            .map(|json| PresenceRecord::from_json(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        outage(&self.unavailable, "presence store")?;
        let json = record.to_json()?;
        trace!(key = %record.key(), "Saving presence record");
        self.records.insert(record.key(), json);
        Ok(())
    }

    async fn remove(&self, username: &str) -> Result<bool, StoreError> {
        outage(&self.unavailable, "presence store")?;
        Ok(self.records.remove(&presence_key(username)).is_some())
    }
}

/// Message store backed by an ordered vector.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    rows: Mutex<Vec<QueuedMessage>>,
    unavailable: AtomicBool,
    deletes_unavailable: AtomicBool,
}

impl MemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored row, in insertion order.
    pub async fn all(&self) -> Vec<QueuedMessage> {
        self.rows.lock().await.clone()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Make only batch deletes fail.
    pub fn set_deletes_unavailable(&self, unavailable: bool) {
        self.deletes_unavailable.store(unavailable, Ordering::Relaxed);
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn enqueue(&self, message: &QueuedMessage) -> Result<(), StoreError> {
        outage(&self.unavailable, "message store")?;
        self.rows.lock().await.push(message.clone());
        Ok(())
    }

    async fn pending(
        &self,
        recipient_id: &str,
        recipient_agent: &str,
    ) -> Result<Vec<QueuedMessage>, StoreError> {
        outage(&self.unavailable, "message store")?;
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|m| {
                !m.delivered && m.recipient_id == recipient_id && m.recipient_agent == recipient_agent
            })
            .cloned()
            .collect())
    }

    async fn delete_many(&self, ids: &[MessageId]) -> Result<u64, StoreError> {
        outage(&self.unavailable, "message store")?;
        outage(&self.deletes_unavailable, "message store")?;
        let ids: HashSet<&MessageId> = ids.iter().collect();
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|m| !ids.contains(&m.id));
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_presence_save_load_remove() {
        let store = MemoryPresenceStore::new();
        assert!(store.load("mona").await.unwrap().is_none());

        let mut record = PresenceRecord::new("mona");
        record.upsert_agent("phone", "online", "127.0.0.1", Utc::now());
        store.save(&record).await.unwrap();

        assert!(store.raw("presence:mona").is_some());
        assert_eq!(store.load("mona").await.unwrap(), Some(record));

        assert!(store.remove("mona").await.unwrap());
        assert!(!store.remove("mona").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_presence_outage() {
        let store = MemoryPresenceStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.load("mona").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_filters_by_device() {
        let store = MemoryMessageStore::new();
        let first = QueuedMessage::new("u-ahmed", "u-mona", "phone", "one");
        let other_agent = QueuedMessage::new("u-ahmed", "u-mona", "desktop", "two");
        let second = QueuedMessage::new("u-ahmed", "u-mona", "phone", "three");
        for m in [&first, &other_agent, &second] {
            store.enqueue(m).await.unwrap();
        }

        let pending = store.pending("u-mona", "phone").await.unwrap();
        assert_eq!(pending, vec![first.clone(), second]);

        assert_eq!(store.delete_many(&[first.id.clone()]).await.unwrap(), 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_delete_outage_keeps_rows() {
        let store = MemoryMessageStore::new();
        let message = QueuedMessage::new("u-ahmed", "u-mona", "phone", "hi");
        store.enqueue(&message).await.unwrap();

        store.set_deletes_unavailable(true);
        assert!(store.delete_many(&[message.id.clone()]).await.is_err());
        assert_eq!(store.pending("u-mona", "phone").await.unwrap().len(), 1);
    }
}
