use serde::{Deserialize, Serialize};

use crate::models::Message;
use crate::{MessageId, UserId};

/// Events pushed from the server to a live gateway connection.
///
/// The gateway is send-only: clients never send commands over the socket,
/// they use the REST surface instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the upgraded connection is registered
    Ready { user_id: UserId, username: String },

    /// A new direct message addressed to this user
    MessageCreate(Message),

    /// The sender edited a message addressed to this user
    MessageUpdate(Message),

    /// The sender deleted a message addressed to this user
    MessageDelete {
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
    },

    /// Receipt for a message this user sent
    MessageStatus {
        id: MessageId,
        is_delivered: bool,
        is_read: bool,
    },
}

impl GatewayEvent {
    /// Serialize to the JSON text carried by a websocket text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
