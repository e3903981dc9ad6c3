//! Per-connection event dispatch.
//!
//! The [`Hub`] wires the presence manager and message router to one set of
//! backends and turns inbound [`ClientEvent`]s into calls on them. Failures
//! are logged and reported back as a [`Dispatched`] value; they never end the
//! connection.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::directory::{ContactGate, IdentityResolver, OpenDirectory};
use crate::identity::DeviceId;
use crate::manager::{Announced, MeetingUpdate, PresenceError, PresenceManager, Withdrawn};
use crate::registry::{ConnectionRegistry, LocalRegistry, RegistryStats};
use crate::router::{MessageRouter, RouteOutcome};
use crate::store::{MemoryMessageStore, MemoryPresenceStore, MessageStore, PresenceStore};
use herald_protocol::ClientEvent;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The collaborators a [`Hub`] runs on.
#[derive(Clone)]
pub struct Backends {
    pub presence: Arc<dyn PresenceStore>,
    pub messages: Arc<dyn MessageStore>,
    pub contacts: Arc<dyn ContactGate>,
    pub identities: Arc<dyn IdentityResolver>,
    pub registry: Arc<dyn ConnectionRegistry>,
}

impl Backends {
    /// Single-process backends: in-memory stores, a local registry and an
    /// open directory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            presence: Arc::new(MemoryPresenceStore::new()),
            messages: Arc::new(MemoryMessageStore::new()),
            contacts: Arc::new(OpenDirectory),
            identities: Arc::new(OpenDirectory),
            registry: Arc::new(LocalRegistry::new()),
        }
    }
}

/// State of one live connection.
#[derive(Debug)]
pub struct Session {
    connection: ConnectionHandle,
    devices: BTreeSet<DeviceId>,
}

impl Session {
    /// The connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// The connection handle.
    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Devices announced on this connection and not yet withdrawn.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.devices.iter()
    }
}

/// Result of dispatching one event.
#[derive(Debug)]
pub enum Dispatched {
    Announced(Announced),
    MeetingUpdated(MeetingUpdate),
    Withdrawn(Withdrawn),
    Routed(RouteOutcome),
    /// The event was malformed and ignored.
    Invalid(&'static str),
    /// A backend failed; the error has been logged.
    Failed,
}

/// Event dispatcher shared by every connection.
pub struct Hub {
    registry: Arc<dyn ConnectionRegistry>,
    presence: PresenceManager,
    router: MessageRouter,
}

impl Hub {
    /// Create a hub over the given backends.
    #[must_use]
    pub fn new(backends: Backends) -> Self {
        let presence = PresenceManager::new(
            backends.presence,
            backends.messages.clone(),
            backends.registry.clone(),
            backends.identities.clone(),
        );
        let router = MessageRouter::new(
            backends.registry.clone(),
            backends.messages,
            backends.contacts,
            backends.identities,
        );
        Self {
            registry: backends.registry,
            presence,
            router,
        }
    }

    /// The presence manager.
    #[must_use]
    pub fn presence(&self) -> &PresenceManager {
        &self.presence
    }

    /// The message router.
    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Start tracking a new connection.
    #[must_use]
    pub fn open_session(&self, connection: ConnectionHandle) -> Session {
        debug!(connection = %connection.id(), "Session opened");
        Session {
            connection,
            devices: BTreeSet::new(),
        }
    }

    /// Handle one inbound event.
    pub async fn dispatch(&self, session: &mut Session, event: ClientEvent) -> Dispatched {
        let name = event.name();
        match event {
            ClientEvent::AnnouncePresence(announce) => {
                // Tracked before the call so a failed drain still gets cleaned up.
                if let Ok(device) = DeviceId::new(&announce.username, &announce.platform) {
                    session.devices.insert(device);
                }
                match self
                    .presence
                    .announce_presence(&session.connection, &announce)
                    .await
                {
                    Ok(announced) => Dispatched::Announced(announced),
                    Err(e) => self.presence_failed(session.id(), name, e),
                }
            }
            ClientEvent::AnnounceInMeeting(update) => {
                match self.presence.announce_in_meeting(&update).await {
                    Ok(outcome) => Dispatched::MeetingUpdated(outcome),
                    Err(e) => self.presence_failed(session.id(), name, e),
                }
            }
            ClientEvent::AnnounceOffline(offline) => {
                let device = match DeviceId::new(&offline.username, &offline.platform) {
                    Ok(device) => device,
                    Err(reason) => {
                        warn!(connection = %session.id(), event = name, reason, "Invalid event");
                        return Dispatched::Invalid(reason);
                    }
                };
                session.devices.remove(&device);
                match self.presence.withdraw_presence(session.id(), &device).await {
                    Ok(outcome) => Dispatched::Withdrawn(outcome),
                    Err(e) => self.presence_failed(session.id(), name, e),
                }
            }
            ClientEvent::SendMessage(message) => match self.router.route(&message).await {
                Ok(outcome) => Dispatched::Routed(outcome),
                Err(e) => {
                    error!(connection = %session.id(), event = name, error = %e, "Routing failed");
                    Dispatched::Failed
                }
            },
        }
    }

    /// Withdraw every device announced on the connection and drop it from
    /// the registry.
    ///
    /// A device whose group still holds another live connection keeps its
    /// presence session. Returns the number of devices withdrawn without
    /// error.
    pub async fn close(&self, session: Session) -> usize {
        let mut withdrawn = 0;
        for device in &session.devices {
            let group = device.group();
            self.registry.leave(session.id(), &group);
            if self.registry.size_of(&group) > 0 {
                debug!(connection = %session.id(), device = %device, "Device still connected elsewhere");
                continue;
            }
            match self.presence.withdraw_presence(session.id(), device).await {
                Ok(_) => withdrawn += 1,
                Err(e) => {
                    error!(connection = %session.id(), device = %device, error = %e, "Withdraw on close failed");
                }
            }
        }
        let left = self.registry.leave_all(session.id());
        debug!(
            connection = %session.id(),
            devices = withdrawn,
            groups = left.len(),
            "Session closed"
        );
        withdrawn
    }

    fn presence_failed(&self, connection: &ConnectionId, event: &str, e: PresenceError) -> Dispatched {
        match e {
            PresenceError::Validation(reason) => {
                warn!(connection = %connection, event, reason, "Invalid event");
                Dispatched::Invalid(reason)
            }
            PresenceError::Store(e) => {
                error!(connection = %connection, event, error = %e, "Presence operation failed");
                Dispatched::Failed
            }
        }
    }
}
