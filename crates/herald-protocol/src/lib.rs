//! # herald-protocol
//!
//! Wire protocol definitions for the Herald presence and routing engine.
//!
//! Devices and the server exchange named events over a WebSocket. This crate
//! defines those events and the codecs used to put them on the wire.
//!
//! ## Events
//!
//! - `announce-presence` / `announce-in-meeting` / `announce-offline` - Device presence
//! - `send-message` - Route a message to a contact's device
//! - `receive-message` / `status-changed` / `in-meeting-updated` - Server notifications
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{codec, ClientEvent, SendMessage};
//!
//! let event = ClientEvent::SendMessage(SendMessage::new("ahmed", "mona", "phone", "Hello!"));
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{
    AnnounceInMeeting, AnnounceOffline, AnnouncePresence, ClientEvent, InMeetingUpdated,
    ReceiveMessage, SendMessage, ServerEvent, StatusChanged, DEFAULT_IP, DEFAULT_STATUS,
    UNKNOWN_PLATFORM,
};
