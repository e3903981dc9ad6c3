//! Store backends selected by configuration.

use crate::config::{DirectoryBackend, MessageBackend, PresenceBackend, StoresConfig};
use anyhow::{Context, Result};
use herald_core::store::sqlite::open_pool;
use herald_core::store::{
    MemoryMessageStore, MemoryPresenceStore, RedisPresenceStore, SqliteDirectory,
    SqliteMessageStore,
};
use herald_core::{Backends, ContactGate, IdentityResolver, LocalRegistry, OpenDirectory};
use std::sync::Arc;
use tracing::{info, warn};

/// Connect every configured store.
///
/// The SQLite message queue and directory share one pool when both are
/// enabled.
///
/// # Errors
///
/// Returns an error if a configured backend cannot be reached.
pub async fn connect(config: &StoresConfig) -> Result<Backends> {
    let presence: Arc<dyn herald_core::PresenceStore> = match config.presence {
        PresenceBackend::Memory => {
            warn!("Using in-memory presence store; presence is not shared between processes");
            Arc::new(MemoryPresenceStore::new())
        }
        PresenceBackend::Redis => {
            let store = RedisPresenceStore::connect(&config.redis_url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
            store.ping().await.context("Redis did not answer PING")?;
            Arc::new(store)
        }
    };

    let needs_sqlite =
        config.messages == MessageBackend::Sqlite || config.contacts == DirectoryBackend::Sqlite;
    let pool = if needs_sqlite {
        Some(
            open_pool(&config.database_url)
                .await
                .with_context(|| format!("Failed to open database {}", config.database_url))?,
        )
    } else {
        None
    };

    let messages: Arc<dyn herald_core::MessageStore> = match (&config.messages, &pool) {
        (MessageBackend::Sqlite, Some(pool)) => {
            let store = SqliteMessageStore::from_pool(pool.clone());
            store.migrate().await.context("Failed to create message queue table")?;
            Arc::new(store)
        }
        _ => {
            warn!("Using in-memory message store; queued messages are lost on restart");
            Arc::new(MemoryMessageStore::new())
        }
    };

    let (contacts, identities): (Arc<dyn ContactGate>, Arc<dyn IdentityResolver>) =
        match (&config.contacts, &pool) {
            (DirectoryBackend::Sqlite, Some(pool)) => {
                let directory = Arc::new(SqliteDirectory::new(pool.clone()));
                directory
                    .ensure_schema()
                    .await
                    .context("Failed to prepare users and contacts tables")?;
                (directory.clone(), directory)
            }
            _ => {
                warn!("Using open directory; every user may message every other user");
                (Arc::new(OpenDirectory), Arc::new(OpenDirectory))
            }
        };

    info!(
        presence = ?config.presence,
        messages = ?config.messages,
        contacts = ?config.contacts,
        "Stores ready"
    );

    Ok(Backends {
        presence,
        messages,
        contacts,
        identities,
        registry: Arc::new(LocalRegistry::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::{MessageStore, PresenceStore, QueuedMessage};

    #[tokio::test]
    async fn test_memory_backends() {
        let backends = connect(&StoresConfig::default()).await.unwrap();
        assert!(backends.presence.load("mona").await.unwrap().is_none());
        assert!(backends
            .contacts
            .is_accepted_contact("mona", "ahmed")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_backends_share_pool() {
        let config = StoresConfig {
            messages: MessageBackend::Sqlite,
            contacts: DirectoryBackend::Sqlite,
            database_url: "sqlite::memory:".into(),
            ..StoresConfig::default()
        };
        let backends = connect(&config).await.unwrap();

        let message = QueuedMessage::new("u-ahmed", "u-mona", "phone", "hi");
        backends.messages.enqueue(&message).await.unwrap();
        assert_eq!(backends.messages.pending("u-mona", "phone").await.unwrap().len(), 1);

        assert!(backends.identities.resolve_username("mona").await.unwrap().is_none());
        assert!(!backends
            .contacts
            .is_accepted_contact("u-ahmed", "u-mona")
            .await
            .unwrap());
    }
}
