//! Event types for the Herald protocol.
//!
//! Every event travels as `{"event": <name>, "data": <payload>}`. Payload field
//! names are camelCase on the wire (`senderId`, `recipientAgent`, `isInMeeting`).
//!
//! Inbound payloads carry defaults for optional fields, so a client may omit
//! `platform`, `status` or `ip` and still be understood.

use serde::{Deserialize, Serialize};

/// Platform name used when a client does not identify its device class.
pub const UNKNOWN_PLATFORM: &str = "UnknownPlatform";

/// Status assumed when an announcement omits one.
pub const DEFAULT_STATUS: &str = "online";

/// Address assumed when an announcement omits one.
pub const DEFAULT_IP: &str = "127.0.0.1";

fn default_platform() -> String {
    UNKNOWN_PLATFORM.to_string()
}

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

fn default_ip() -> String {
    DEFAULT_IP.to_string()
}

/// A device announcing itself (or a status change) for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncePresence {
    /// Username announcing presence.
    #[serde(default)]
    pub username: String,
    /// Device class (phone, desktop, tablet, or a client agent string).
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Free-form status (online, busy, away, ...).
    #[serde(default = "default_status")]
    pub status: String,
    /// Informational client address.
    #[serde(default = "default_ip")]
    pub ip: String,
}

impl AnnouncePresence {
    /// Create an announcement with the default address.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        platform: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            platform: platform.into(),
            status: status.into(),
            ip: default_ip(),
        }
    }

    /// Set the client address.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }
}

/// A device toggling its in-meeting flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceInMeeting {
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub is_in_meeting: bool,
}

/// A device logging out without closing its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceOffline {
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_platform")]
    pub platform: String,
}

/// A request to deliver `content` to one device of `recipient_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Sender username or id, as the client knows it.
    #[serde(default)]
    pub sender_id: String,
    /// Recipient username or id, as the client knows it.
    #[serde(default)]
    pub recipient_id: String,
    /// Target platform of the recipient.
    #[serde(default = "default_platform")]
    pub recipient_agent: String,
    /// Opaque message body.
    pub content: String,
}

impl SendMessage {
    /// Create a send request.
    #[must_use]
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        recipient_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            recipient_agent: recipient_agent.into(),
            content: content.into(),
        }
    }
}

/// A message handed to a device, either live or from its offline queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessage {
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub recipient_agent: String,
}

/// Notification that a device identity changed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    pub username: String,
    pub platform: String,
    pub status: String,
}

/// Notification that a device identity changed its in-meeting flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InMeetingUpdated {
    pub username: String,
    pub platform: String,
    pub is_in_meeting: bool,
}

/// Events sent by a device to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "announce-presence")]
    AnnouncePresence(AnnouncePresence),

    #[serde(rename = "announce-in-meeting")]
    AnnounceInMeeting(AnnounceInMeeting),

    #[serde(rename = "announce-offline")]
    AnnounceOffline(AnnounceOffline),

    #[serde(rename = "send-message")]
    SendMessage(SendMessage),
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::AnnouncePresence(_) => "announce-presence",
            ClientEvent::AnnounceInMeeting(_) => "announce-in-meeting",
            ClientEvent::AnnounceOffline(_) => "announce-offline",
            ClientEvent::SendMessage(_) => "send-message",
        }
    }
}

/// Events sent by the server to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Sent once when the transport is established.
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },

    #[serde(rename = "receive-message")]
    ReceiveMessage(ReceiveMessage),

    #[serde(rename = "status-changed")]
    StatusChanged(StatusChanged),

    #[serde(rename = "in-meeting-updated")]
    InMeetingUpdated(InMeetingUpdated),
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::ReceiveMessage(_) => "receive-message",
            ServerEvent::StatusChanged(_) => "status-changed",
            ServerEvent::InMeetingUpdated(_) => "in-meeting-updated",
        }
    }

    /// Create a Connected event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>) -> Self {
        ServerEvent::Connected {
            connection_id: connection_id.into(),
        }
    }

    /// Create a ReceiveMessage event.
    #[must_use]
    pub fn receive_message(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        content: impl Into<String>,
        recipient_agent: impl Into<String>,
    ) -> Self {
        ServerEvent::ReceiveMessage(ReceiveMessage {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            content: content.into(),
            recipient_agent: recipient_agent.into(),
        })
    }

    /// Create a StatusChanged event.
    #[must_use]
    pub fn status_changed(
        username: impl Into<String>,
        platform: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        ServerEvent::StatusChanged(StatusChanged {
            username: username.into(),
            platform: platform.into(),
            status: status.into(),
        })
    }

    /// Create an InMeetingUpdated event.
    #[must_use]
    pub fn in_meeting_updated(
        username: impl Into<String>,
        platform: impl Into<String>,
        is_in_meeting: bool,
    ) -> Self {
        ServerEvent::InMeetingUpdated(InMeetingUpdated {
            username: username.into(),
            platform: platform.into(),
            is_in_meeting,
        })
    }
}
