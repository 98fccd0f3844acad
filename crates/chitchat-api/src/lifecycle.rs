use std::str::FromStr;

use tracing::{debug, info};

use chitchat_gateway::Registry;
use chitchat_types::events::GatewayEvent;
use chitchat_types::models::Message;
use chitchat_types::{MessageId, UserId};

use crate::error::{ApiError, ApiResult};
use crate::store::Store;

/// How a failed ownership check is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipPolicy {
    /// Answer `NotFound`, same as a missing id.
    #[default]
    Conceal,
    /// Answer `Forbidden`.
    Reveal,
}

impl OwnershipPolicy {
    pub fn from_reveal_flag(reveal: bool) -> Self {
        if reveal { Self::Reveal } else { Self::Conceal }
    }
}

impl FromStr for OwnershipPolicy {
    type Err = std::convert::Infallible;

    /// Truthy strings ("1", "true", "yes") reveal; anything else conceals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reveal = matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        Ok(Self::from_reveal_flag(reveal))
    }
}

/// Which party of a message may perform an operation.
#[derive(Debug, Clone, Copy)]
enum Party {
    Sender,
    Receiver,
}

/// Legal transitions on a stored message. The flags are independent:
/// delivered and read are set by the receiver, edits and deletes belong to
/// the sender, and none of them resets another.
#[derive(Clone)]
pub struct Lifecycle {
    store: Store,
    registry: Registry,
    ownership: OwnershipPolicy,
}

impl Lifecycle {
    pub fn new(store: Store, registry: Registry, ownership: OwnershipPolicy) -> Self {
        Self {
            store,
            registry,
            ownership,
        }
    }

    /// Receiver acknowledges delivery. Re-marking is a successful no-op.
    pub async fn mark_delivered(&self, id: MessageId, requester: UserId) -> ApiResult<Message> {
        self.load_owned(id, requester, Party::Receiver).await?;
        let changed = self.store.mark_delivered(id).await?;
        self.settle_flip(id, changed).await
    }

    /// Receiver acknowledges reading. Re-marking is a successful no-op.
    pub async fn mark_read(&self, id: MessageId, requester: UserId) -> ApiResult<Message> {
        self.load_owned(id, requester, Party::Receiver).await?;
        let changed = self.store.mark_read(id).await?;
        self.settle_flip(id, changed).await
    }

    /// Sender replaces the content. Delivery and read flags are kept.
    pub async fn edit(&self, id: MessageId, requester: UserId, content: String) -> ApiResult<Message> {
        if content.trim().is_empty() {
            return Err(ApiError::invalid("content must not be empty"));
        }

        let message = self.load_owned(id, requester, Party::Sender).await?;
        if !self.store.update_content(id, content, message.version).await? {
            return Err(ApiError::Conflict(format!(
                "message {} changed concurrently; retry",
                id
            )));
        }

        let updated = self.reload(id).await?;
        let outcome = self
            .registry
            .send_event(updated.receiver_id, &GatewayEvent::MessageUpdate(updated.clone()))
            .await;
        debug!("Message {} edited by {}: push {:?}", id, requester, outcome);
        Ok(updated)
    }

    /// Sender soft-deletes the message; it disappears from every read path.
    pub async fn delete(&self, id: MessageId, requester: UserId) -> ApiResult<Message> {
        let message = self.load_owned(id, requester, Party::Sender).await?;
        if !self.store.soft_delete(id, message.version).await? {
            return Err(ApiError::Conflict(format!(
                "message {} changed concurrently; retry",
                id
            )));
        }

        info!("Message {} deleted by {}", id, requester);
        let event = GatewayEvent::MessageDelete {
            id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
        };
        self.registry.send_event(message.receiver_id, &event).await;
        Ok(message)
    }

    async fn load_owned(&self, id: MessageId, requester: UserId, party: Party) -> ApiResult<Message> {
        let message = self.store.message(id).await?.ok_or(ApiError::NotFound("Message"))?;
        let owner = match party {
            Party::Sender => message.sender_id,
            Party::Receiver => message.receiver_id,
        };

        if owner != requester {
            debug!(
                "User {} is not the {:?} of message {}",
                requester, party, id
            );
            return Err(match self.ownership {
                OwnershipPolicy::Conceal => ApiError::NotFound("Message"),
                OwnershipPolicy::Reveal => ApiError::Forbidden,
            });
        }
        Ok(message)
    }

    /// Current state after a flag flip; only a real change notifies the sender.
    async fn settle_flip(&self, id: MessageId, changed: bool) -> ApiResult<Message> {
        let current = self.reload(id).await?;
        if changed {
            self.notify_sender(&current).await;
        }
        Ok(current)
    }

    async fn reload(&self, id: MessageId) -> ApiResult<Message> {
        // May have been deleted since the ownership check.
        self.store.message(id).await?.ok_or(ApiError::NotFound("Message"))
    }

    async fn notify_sender(&self, message: &Message) {
        let event = GatewayEvent::MessageStatus {
            id: message.id,
            is_delivered: message.is_delivered,
            is_read: message.is_read,
        };
        self.registry.send_event(message.sender_id, &event).await;
    }
}
