use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use chitchat_db::Database;
use chitchat_db::models::{NewMessage, UserRow};
use chitchat_types::models::Message;
use chitchat_types::{MessageId, UserId};

use crate::error::{ApiError, ApiResult};

/// Owned input for `Store::create_message`.
pub struct MessageDraft {
    pub content: String,
    pub image_url: Option<String>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub group_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Async adapter over the blocking SQLite store. Every call runs on the
/// blocking pool; unique collisions come back as
/// `ApiError::Conflict` and any other store failure as `ApiError::Storage`.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Run `f` against the database off the async runtime.
    pub async fn blocking<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(e.to_string())
            })?
            .map_err(ApiError::from)
    }

    /// Look up an account that can still send and receive.
    pub async fn active_user(&self, id: UserId) -> ApiResult<Option<UserRow>> {
        let row = self.blocking(move |db| db.get_user_by_id(id)).await?;
        Ok(row.filter(|u| u.is_active))
    }

    pub async fn create_message(&self, draft: MessageDraft) -> ApiResult<Message> {
        let row = self
            .blocking(move |db| {
                db.insert_message(&NewMessage {
                    content: &draft.content,
                    image_url: draft.image_url.as_deref(),
                    sender_id: draft.sender_id,
                    receiver_id: draft.receiver_id,
                    group_id: draft.group_id,
                    timestamp: draft.timestamp,
                })
            })
            .await?;
        Ok(row.into())
    }

    pub async fn message(&self, id: MessageId) -> ApiResult<Option<Message>> {
        let row = self.blocking(move |db| db.get_message(id)).await?;
        Ok(row.map(Message::from))
    }

    pub async fn conversation(&self, a: UserId, b: UserId) -> ApiResult<Vec<Message>> {
        let rows = self.blocking(move |db| db.get_conversation(a, b)).await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    pub async fn mark_delivered(&self, id: MessageId) -> ApiResult<bool> {
        self.blocking(move |db| db.mark_delivered(id)).await
    }

    pub async fn mark_read(&self, id: MessageId) -> ApiResult<bool> {
        self.blocking(move |db| db.mark_read(id)).await
    }

    pub async fn update_content(
        &self,
        id: MessageId,
        content: String,
        expected_version: i64,
    ) -> ApiResult<bool> {
        self.blocking(move |db| db.update_content(id, &content, expected_version))
            .await
    }

    pub async fn soft_delete(&self, id: MessageId, expected_version: i64) -> ApiResult<bool> {
        self.blocking(move |db| db.soft_delete_message(id, expected_version))
            .await
    }
}
