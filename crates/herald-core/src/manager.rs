//! Presence manager.
//!
//! Owns the protocol for a device announcing itself, flagging a meeting and
//! withdrawing, and drains the offline queue when a device (re)connects.
//!
//! Presence records are read-modify-written as a whole. Mutations for one
//! username are serialized through a per-username async mutex so two
//! platforms of the same user announcing at once cannot lose an update inside
//! this process. Writers in other processes sharing the presence store are
//! not covered by this lock.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::directory::IdentityResolver;
use crate::identity::DeviceId;
use crate::presence::{AgentChange, PresenceRecord};
use crate::registry::ConnectionRegistry;
use crate::store::{MessageId, MessageStore, PresenceStore, QueuedMessage, StoreError};
use chrono::Utc;
use dashmap::DashMap;
use herald_protocol::{AnnounceInMeeting, AnnouncePresence, ServerEvent, DEFAULT_IP, DEFAULT_STATUS};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Presence errors.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The inbound event is missing a required field.
    #[error("Invalid event: {0}")]
    Validation(&'static str),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of draining the offline queue for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages handed to the connection.
    pub emitted: usize,
    /// Rows removed from the message store.
    pub deleted: u64,
}

/// Result of a successful presence announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announced {
    pub device: DeviceId,
    pub change: AgentChange,
    pub drain: DrainReport,
}

/// Result of an in-meeting announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingUpdate {
    /// The flag was stored and broadcast to this many connections.
    Updated { notified: usize },
    /// The user has no presence record.
    NoRecord,
    /// The user is present, but not on this platform.
    NoSession,
}

/// Result of withdrawing a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Withdrawn {
    /// The platform was removed; other platforms remain.
    AgentRemoved,
    /// The platform was the last one and the whole record was deleted.
    RecordDeleted,
    /// Nothing was stored for this device.
    NotPresent,
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default
    } else {
        trimmed
    }
}

/// Presence protocol over the shared stores and the connection registry.
pub struct PresenceManager {
    presence: Arc<dyn PresenceStore>,
    messages: Arc<dyn MessageStore>,
    registry: Arc<dyn ConnectionRegistry>,
    identities: Arc<dyn IdentityResolver>,
    /// Per-username write locks.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PresenceManager {
    /// Create a manager over the given collaborators.
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        messages: Arc<dyn MessageStore>,
        registry: Arc<dyn ConnectionRegistry>,
        identities: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            presence,
            messages,
            registry,
            identities,
            locks: DashMap::new(),
        }
    }

    /// Current presence record of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store fails.
    pub async fn presence_of(&self, username: &str) -> Result<Option<PresenceRecord>, PresenceError> {
        Ok(self.presence.load(username.trim()).await?)
    }

    /// Record a device as online, join its group, notify the group and drain
    /// any messages queued for it.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Validation`] if the username is missing, or a
    /// store error. A drain failure is reported after presence has already
    /// been recorded and the group joined.
    pub async fn announce_presence(
        &self,
        connection: &ConnectionHandle,
        event: &AnnouncePresence,
    ) -> Result<Announced, PresenceError> {
        let device =
            DeviceId::new(&event.username, &event.platform).map_err(PresenceError::Validation)?;
        let status = or_default(&event.status, DEFAULT_STATUS);
        let ip = or_default(&event.ip, DEFAULT_IP);

        let change = self
            .with_user_lock(device.username(), || async {
                let mut record = self
                    .presence
                    .load(device.username())
                    .await?
                    .unwrap_or_else(|| PresenceRecord::new(device.username()));
                let change = record.upsert_agent(device.platform(), status, ip, Utc::now());
                self.presence.save(&record).await?;
                Ok::<_, PresenceError>(change)
            })
            .await?;

        let group = device.group();
        self.registry.join(connection, &group);
        let notified = self.registry.multicast(
            &group,
            ServerEvent::status_changed(device.username(), device.platform(), status),
        );

        info!(
            device = %device,
            connection = %connection.id(),
            status = %status,
            ?change,
            notified,
            "Presence announced"
        );

        let drain = self.drain(connection, &device).await?;
        Ok(Announced {
            device,
            change,
            drain,
        })
    }

    /// Set the in-meeting flag of an already announced device.
    ///
    /// A device that has not announced presence is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Validation`] if the username is missing, or a
    /// store error.
    pub async fn announce_in_meeting(
        &self,
        event: &AnnounceInMeeting,
    ) -> Result<MeetingUpdate, PresenceError> {
        let device =
            DeviceId::new(&event.username, &event.platform).map_err(PresenceError::Validation)?;

        let stored = self
            .with_user_lock(device.username(), || async {
                let Some(mut record) = self.presence.load(device.username()).await? else {
                    return Ok::<_, PresenceError>(MeetingUpdate::NoRecord);
                };
                if !record.set_in_meeting(device.platform(), event.is_in_meeting) {
                    return Ok(MeetingUpdate::NoSession);
                }
                self.presence.save(&record).await?;
                Ok(MeetingUpdate::Updated { notified: 0 })
            })
            .await?;

        if !matches!(stored, MeetingUpdate::Updated { .. }) {
            debug!(device = %device, outcome = ?stored, "Ignoring in-meeting update for absent device");
            return Ok(stored);
        }

        let notified = self.registry.multicast(
            &device.group(),
            ServerEvent::in_meeting_updated(
                device.username(),
                device.platform(),
                event.is_in_meeting,
            ),
        );
        debug!(device = %device, is_in_meeting = event.is_in_meeting, notified, "In-meeting updated");
        Ok(MeetingUpdate::Updated { notified })
    }

    /// Remove a device's session and take the connection out of its group.
    ///
    /// The connection always leaves the group, even when the store fails or
    /// holds nothing for the device.
    ///
    /// # Errors
    ///
    /// Returns a store error if the record could not be read or written.
    pub async fn withdraw_presence(
        &self,
        connection_id: &ConnectionId,
        device: &DeviceId,
    ) -> Result<Withdrawn, PresenceError> {
        let outcome = self
            .with_user_lock(device.username(), || async {
                let Some(mut record) = self.presence.load(device.username()).await? else {
                    return Ok::<_, PresenceError>(Withdrawn::NotPresent);
                };
                if record.remove_agent(device.platform()).is_none() {
                    return Ok(Withdrawn::NotPresent);
                }
                if record.is_empty() {
                    self.presence.remove(device.username()).await?;
                    Ok(Withdrawn::RecordDeleted)
                } else {
                    self.presence.save(&record).await?;
                    Ok(Withdrawn::AgentRemoved)
                }
            })
            .await;

        self.registry.leave(connection_id, &device.group());

        let outcome = outcome?;
        info!(device = %device, connection = %connection_id, ?outcome, "Presence withdrawn");
        Ok(outcome)
    }

    /// Deliver every queued message for `device` to `connection`, oldest
    /// first, then delete the delivered rows in one batch.
    ///
    /// Only rows that were handed to the connection are deleted. If the batch
    /// delete fails they stay queued and are delivered again next time.
    ///
    /// # Errors
    ///
    /// Returns a store error if the queue could not be read or trimmed.
    pub async fn drain(
        &self,
        connection: &ConnectionHandle,
        device: &DeviceId,
    ) -> Result<DrainReport, PresenceError> {
        let Some(recipient_id) = self.identities.resolve_username(device.username()).await? else {
            debug!(device = %device, "Unknown user, skipping drain");
            return Ok(DrainReport::default());
        };

        let pending = self.messages.pending(&recipient_id, device.platform()).await?;
        if pending.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut senders: HashMap<String, String> = HashMap::new();
        let mut sent: Vec<MessageId> = Vec::with_capacity(pending.len());
        for message in pending {
            let sender = match senders.get(&message.sender_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self.sender_name(&message).await;
                    senders.insert(message.sender_id.clone(), name.clone());
                    name
                }
            };

            let event = ServerEvent::receive_message(
                sender,
                device.username(),
                message.content,
                message.recipient_agent,
            );
            if !connection.send(Arc::new(event)) {
                warn!(device = %device, connection = %connection.id(), "Connection closed during drain");
                break;
            }
            sent.push(message.id);
        }

        let emitted = sent.len();
        let deleted = match self.messages.delete_many(&sent).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(device = %device, emitted, error = %e, "Drained messages not deleted, they will be redelivered");
                return Err(e.into());
            }
        };

        info!(device = %device, emitted, deleted, "Drained offline messages");
        Ok(DrainReport { emitted, deleted })
    }

    async fn sender_name(&self, message: &QueuedMessage) -> String {
        match self.identities.username_of(&message.sender_id).await {
            Ok(Some(name)) => name,
            Ok(None) => message.sender_id.clone(),
            Err(e) => {
                warn!(sender = %message.sender_id, error = %e, "Sender lookup failed");
                message.sender_id.clone()
            }
        }
    }

    async fn with_user_lock<F, Fut, T>(&self, username: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let entry = UserLockEntry {
            locks: &self.locks,
            username,
            lock: self.locks.entry(username.to_string()).or_default().clone(),
        };
        let _guard = entry.lock.lock().await;
        f().await
    }
}

/// One task's hold on a username lock. Dropping it, including when the
/// owning future is cancelled, removes the map entry once no other task
/// references the lock.
struct UserLockEntry<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    username: &'a str,
    lock: Arc<Mutex<()>>,
}

impl Drop for UserLockEntry<'_> {
    fn drop(&mut self) {
        // The map and this entry hold the only two references.
        self.locks.remove_if(self.username, |_, l| {
            Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2
        });
    }
}
