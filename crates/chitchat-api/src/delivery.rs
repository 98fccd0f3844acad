use tracing::debug;

use chitchat_gateway::{PushOutcome, Registry};
use chitchat_types::UserId;
use chitchat_types::api::SendMessageRequest;
use chitchat_types::events::GatewayEvent;
use chitchat_types::models::Message;

use crate::error::{ApiError, ApiResult};
use crate::store::{MessageDraft, Store};

/// Persists new messages and fans them out to the receiver's live
/// connection. Fan-out is fire-and-forget and never flips `is_delivered`;
/// only an explicit acknowledgement or the receiver's next fetch does.
#[derive(Clone)]
pub struct Delivery {
    store: Store,
    registry: Registry,
}

impl Delivery {
    pub fn new(store: Store, registry: Registry) -> Self {
        Self { store, registry }
    }

    pub async fn send_message(&self, sender_id: UserId, req: SendMessageRequest) -> ApiResult<Message> {
        if req.content.trim().is_empty() {
            return Err(ApiError::invalid("content must not be empty"));
        }
        if req.receiver_id == sender_id {
            return Err(ApiError::invalid("cannot send a message to yourself"));
        }

        // A token can outlive its account; re-resolve both ends.
        self.store
            .active_user(sender_id)
            .await?
            .ok_or(ApiError::NotFound("Sender"))?;
        self.store
            .active_user(req.receiver_id)
            .await?
            .ok_or(ApiError::NotFound("Receiver"))?;

        let message = self
            .store
            .create_message(MessageDraft {
                content: req.content,
                image_url: req.image_url.filter(|url| !url.trim().is_empty()),
                sender_id,
                receiver_id: req.receiver_id,
                group_id: req.group_id,
                timestamp: chrono::Utc::now(),
            })
            .await?;

        let outcome = self
            .registry
            .send_event(message.receiver_id, &GatewayEvent::MessageCreate(message.clone()))
            .await;
        debug!(
            "Message {} from {} to {}: push {:?}",
            message.id, sender_id, message.receiver_id, outcome
        );

        Ok(message)
    }

    /// The full conversation between `requester` and `peer`, oldest first.
    ///
    /// Fetching acknowledges delivery: every message addressed to the
    /// requester that was not yet delivered is marked delivered and
    /// persisted before the list is returned, and its sender is notified.
    pub async fn get_messages(&self, requester: UserId, peer: UserId) -> ApiResult<Vec<Message>> {
        self.store
            .active_user(requester)
            .await?
            .ok_or(ApiError::NotFound("User"))?;

        let mut messages = self.store.conversation(requester, peer).await?;

        let mut acknowledged = Vec::new();
        for message in messages
            .iter_mut()
            .filter(|m| m.receiver_id == requester && !m.is_delivered)
        {
            if self.store.mark_delivered(message.id).await? {
                message.version += 1;
                acknowledged.push((message.sender_id, message.id, message.is_read));
            }
            message.is_delivered = true;
        }

        for (sender_id, id, is_read) in acknowledged {
            let event = GatewayEvent::MessageStatus {
                id,
                is_delivered: true,
                is_read,
            };
            if self.registry.send_event(sender_id, &event).await == PushOutcome::Queued {
                debug!("Delivery receipt for message {} pushed to {}", id, sender_id);
            }
        }

        Ok(messages)
    }
}
