//! Live connection handles.
//!
//! A handle is the registry's view of one open transport connection: an id and
//! an outbound queue. The transport task owns the receiving end and writes
//! whatever arrives to the socket.

use herald_protocol::ServerEvent;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Receiving end of a connection's outbound queue.
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// Sending side of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Arc<ServerEvent>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the transport drains.
    #[must_use]
    pub fn channel(id: ConnectionId) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { id, sender }, receiver)
    }

    /// The connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue an event for this connection.
    ///
    /// Returns `false` if the transport side has gone away.
    pub fn send(&self, event: Arc<ServerEvent>) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Check if the transport side is still reading.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_handle_send_and_close() {
        let (handle, mut rx) = ConnectionHandle::channel("conn-1".into());
        assert!(handle.is_open());
        assert!(handle.send(Arc::new(ServerEvent::connected("conn-1"))));
        assert_eq!(rx.try_recv().unwrap().name(), "connected");

        drop(rx);
        assert!(!handle.is_open());
        assert!(!handle.send(Arc::new(ServerEvent::connected("conn-1"))));
    }
}
