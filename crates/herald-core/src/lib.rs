//! # herald-core
//!
//! Multi-device presence and message routing for the Herald engine.
//!
//! A user is present on one or more *platforms* (phone, desktop, an arbitrary
//! agent string). Each (username, platform) pair is a device identity with its
//! own group of live connections. Messages to a live device are multicast to
//! that group; messages to an offline device are queued and drained the next
//! time it announces itself.
//!
//! - **Registry** - Groups live connections by device identity
//! - **Presence** - Per-user records of live platforms
//! - **Manager** - Announce, in-meeting and withdraw protocol, plus the drain
//! - **Router** - Live delivery or durable enqueue, gated on contacts
//! - **Store** - Presence and message store traits with memory, Redis and
//!   SQLite adapters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │  Connection │────▶│     Hub     │────▶│ PresenceManager  │──┐
//! └─────────────┘     └─────────────┘     └──────────────────┘  │
//!                            │                                  ▼
//!                            ▼                           ┌─────────────┐
//!                     ┌─────────────┐                    │  Registry   │
//!                     │   Router    │───────────────────▶└─────────────┘
//!                     └─────────────┘
//!                            │
//!                            ▼
//!                  ┌───────────────────┐
//!                  │ Presence/Message  │
//!                  │      stores       │
//!                  └───────────────────┘
//! ```

pub mod connection;
pub mod directory;
pub mod group;
pub mod hub;
pub mod identity;
pub mod manager;
pub mod presence;
pub mod registry;
pub mod router;
pub mod store;

pub use connection::{ConnectionHandle, ConnectionId, EventReceiver};
pub use directory::{ContactGate, ContactStatus, IdentityResolver, OpenDirectory, StaticDirectory};
pub use hub::{Backends, Dispatched, Hub, Session};
pub use identity::{group_name, DeviceId, UserId};
pub use manager::{Announced, DrainReport, MeetingUpdate, PresenceError, PresenceManager, Withdrawn};
pub use presence::{AgentChange, AgentSession, PresenceRecord};
pub use registry::{ConnectionRegistry, LocalRegistry, RegistryStats};
pub use router::{DropReason, MessageRouter, RouteError, RouteOutcome};
pub use store::{MessageId, MessageStore, PresenceStore, QueuedMessage, StoreError};
