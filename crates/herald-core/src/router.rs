//! Message router.
//!
//! Decides, for one message, between live delivery to the recipient device's
//! group and a durable enqueue. A message from a non-contact is dropped
//! without telling the sender.

use crate::directory::{ContactGate, IdentityResolver};
use crate::identity::{group_name, DeviceId};
use crate::registry::ConnectionRegistry;
use crate::store::{MessageStore, QueuedMessage, StoreError};
use herald_protocol::{SendMessage, ServerEvent};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouteError {
    /// A store, gate or directory lookup failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A required field is missing.
    Invalid(&'static str),
    /// The sender does not resolve to a known user.
    UnknownSender,
    /// The recipient does not resolve to a known user.
    UnknownRecipient,
    /// Sender and recipient are not accepted contacts.
    NotAContact,
}

impl DropReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Invalid(_) => "invalid",
            DropReason::UnknownSender => "unknown_sender",
            DropReason::UnknownRecipient => "unknown_recipient",
            DropReason::NotAContact => "not_a_contact",
        }
    }
}

/// What happened to a routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Multicast to this many live connections. Nothing was stored.
    Delivered { recipients: usize },
    /// Stored for the device to pick up when it reconnects.
    Queued(QueuedMessage),
    /// Not delivered and not stored.
    Dropped(DropReason),
}

impl RouteOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteOutcome::Delivered { .. } => "delivered",
            RouteOutcome::Queued(_) => "queued",
            RouteOutcome::Dropped(_) => "dropped",
        }
    }
}

/// Routes messages between contacts.
pub struct MessageRouter {
    registry: Arc<dyn ConnectionRegistry>,
    messages: Arc<dyn MessageStore>,
    contacts: Arc<dyn ContactGate>,
    identities: Arc<dyn IdentityResolver>,
}

impl MessageRouter {
    /// Create a router over the given collaborators.
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        messages: Arc<dyn MessageStore>,
        contacts: Arc<dyn ContactGate>,
        identities: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            registry,
            messages,
            contacts,
            identities,
        }
    }

    /// Route one message.
    ///
    /// Every message between accepted contacts ends up either multicast or
    /// queued, never both. If the recipient's group looks live but nobody
    /// receives the multicast, the message is queued instead.
    ///
    /// # Errors
    ///
    /// Returns an error if an identity lookup, the contact gate or the
    /// message store fails.
    pub async fn route(&self, message: &SendMessage) -> Result<RouteOutcome, RouteError> {
        let sender = message.sender_id.trim();
        if sender.is_empty() {
            return Ok(self.dropped(message, DropReason::Invalid("senderId is missing")));
        }
        let recipient = match DeviceId::new(&message.recipient_id, &message.recipient_agent) {
            Ok(device) => device,
            Err(reason) => return Ok(self.dropped(message, DropReason::Invalid(reason))),
        };

        let Some(sender_id) = self.identities.resolve_username(sender).await? else {
            return Ok(self.dropped(message, DropReason::UnknownSender));
        };
        let Some(recipient_id) = self.identities.resolve_username(recipient.username()).await?
        else {
            return Ok(self.dropped(message, DropReason::UnknownRecipient));
        };

        if !self
            .contacts
            .is_accepted_contact(&sender_id, &recipient_id)
            .await?
        {
            return Ok(self.dropped(message, DropReason::NotAContact));
        }

        // Groups are keyed by the announced username, whichever form the
        // sender used.
        let recipient_name = self
            .identities
            .username_of(&recipient_id)
            .await?
            .unwrap_or_else(|| recipient.username().to_string());
        let group = group_name(&recipient_name, Some(recipient.platform()));

        if self.registry.size_of(&group) > 0 {
            let recipients = self.registry.multicast(
                &group,
                ServerEvent::receive_message(
                    sender,
                    recipient.username(),
                    message.content.as_str(),
                    recipient.platform(),
                ),
            );
            if recipients > 0 {
                debug!(group = %group, recipients, "Delivered live");
                return Ok(RouteOutcome::Delivered { recipients });
            }
            warn!(group = %group, "Group emptied before multicast, queueing");
        }

        let queued = QueuedMessage::new(
            sender_id,
            recipient_id,
            recipient.platform(),
            message.content.as_str(),
        );
        self.messages.enqueue(&queued).await?;
        info!(
            message = %queued.id,
            recipient = %recipient,
            "Recipient offline, message queued"
        );
        Ok(RouteOutcome::Queued(queued))
    }

    fn dropped(&self, message: &SendMessage, reason: DropReason) -> RouteOutcome {
        trace!(
            sender = %message.sender_id,
            recipient = %message.recipient_id,
            reason = reason.as_str(),
            "Message dropped"
        );
        if let DropReason::Invalid(detail) = reason {
            warn!(detail, "Invalid send-message event");
        }
        RouteOutcome::Dropped(reason)
    }
}
