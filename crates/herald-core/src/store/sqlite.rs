//! SQLite-backed message queue and directory.
//!
//! `queued_messages` is owned by this crate. `users` and `contacts` belong to
//! the account and contact services; [`SqliteDirectory`] only reads them.

use super::{MessageId, MessageStore, QueuedMessage, StoreError};
use crate::directory::{ContactGate, ContactStatus, IdentityResolver};
use crate::identity::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

/// Rows deleted per statement inside one batch delete.
const DELETE_CHUNK: usize = 500;

/// Open a pool, creating the database file if needed.
///
/// `sqlite::memory:` databases are private to one connection, so the pool is
/// capped at a single connection for them.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the database cannot be opened.
pub async fn open_pool(url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let max_connections = if url.contains(":memory:") { 1 } else { 8 };
    Ok(SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?)
}

type MessageRow = (String, String, String, String, String, i64, bool);

fn message_from_row(row: MessageRow) -> Result<QueuedMessage, StoreError> {
    let (id, sender_id, recipient_id, recipient_agent, content, timestamp_ms, delivered) = row;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| StoreError::Corrupt(format!("message {id} has timestamp {timestamp_ms}")))?;
    Ok(QueuedMessage {
        id: MessageId::new(id),
        sender_id,
        recipient_id,
        recipient_agent,
        content,
        timestamp,
        delivered,
    })
}

/// Durable message queue in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Open the database at `url` and create the queue table.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let store = Self::from_pool(open_pool(url).await?);
        store.migrate().await?;
        info!("Opened SQLite message store");
        Ok(store)
    }

    /// Use an existing pool. Call [`migrate`](Self::migrate) before use.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the queue table and its lookup index.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queued_messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                recipient_agent TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queued_messages_recipient \
             ON queued_messages (recipient_id, recipient_agent, delivered)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn enqueue(&self, message: &QueuedMessage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO queued_messages
                (id, sender_id, recipient_id, recipient_agent, content, timestamp_ms, delivered)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.id.as_str())
        .bind(&message.sender_id)
        .bind(&message.recipient_id)
        .bind(&message.recipient_agent)
        .bind(&message.content)
        .bind(message.timestamp.timestamp_millis())
        .bind(message.delivered)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending(
        &self,
        recipient_id: &str,
        recipient_agent: &str,
    ) -> Result<Vec<QueuedMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, sender_id, recipient_id, recipient_agent, content, timestamp_ms, delivered
            FROM queued_messages
            WHERE recipient_id = ? AND recipient_agent = ? AND delivered = 0
            ORDER BY timestamp_ms, rowid
            "#,
        )
        .bind(recipient_id)
        .bind(recipient_agent)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn delete_many(&self, ids: &[MessageId]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM queued_messages WHERE id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");
            removed += query.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        debug!(requested = ids.len(), removed, "Deleted queued messages");
        Ok(removed)
    }
}

/// Read-only view of the account and contact tables.
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    /// Use an existing pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `users` and `contacts` tables if the owning services have
    /// not done so yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                user_id TEXT NOT NULL,
                friend_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                UNIQUE(user_id, friend_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ContactGate for SqliteDirectory {
    async fn is_accepted_contact(&self, user_a: &str, user_b: &str) -> Result<bool, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT status FROM contacts
            WHERE status = ?
              AND ((user_id = ? AND friend_id = ?) OR (user_id = ? AND friend_id = ?))
            LIMIT 1
            "#,
        )
        .bind(ContactStatus::Accepted.as_str())
        .bind(user_a)
        .bind(user_b)
        .bind(user_b)
        .bind(user_a)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((status,)) => Ok(status.parse::<ContactStatus>()? == ContactStatus::Accepted),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl IdentityResolver for SqliteDirectory {
    async fn resolve_username(&self, name_or_id: &str) -> Result<Option<UserId>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM users WHERE username = ? OR id = ? LIMIT 1")
                .bind(name_or_id)
                .bind(name_or_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn username_of(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT username FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(username,)| username))
    }
}
