use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, UserId};

/// Public view of an account. The password digest never leaves the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub profile_pic: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A direct message as returned to clients and pushed over the gateway.
///
/// Soft-deleted messages are never materialised into this type, so the
/// deleted flag is not part of the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub image_url: Option<String>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// Reserved for group conversations; carried but never interpreted.
    pub group_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub is_delivered: bool,
    pub is_read: bool,
    pub is_edited: bool,
    pub version: i64,
}
