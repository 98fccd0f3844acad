//! Database row types — these map directly to SQLite rows.
//! Distinct from chitchat-types API models to keep the DB layer independent.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use tracing::warn;

use chitchat_types::models::{Message, User};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub profile_pic: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub content: String,
    pub image_url: Option<String>,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub group_id: Option<i64>,
    pub timestamp: String,
    pub is_delivered: bool,
    pub is_read: bool,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub version: i64,
}

/// Insert payload for a new account.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub date_of_birth: Option<NaiveDate>,
    pub profile_pic: &'a str,
}

/// Insert payload for a new message. Flags always start false.
pub struct NewMessage<'a> {
    pub content: &'a str,
    pub image_url: Option<&'a str>,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub group_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Partial profile update; `None` keeps the stored value.
#[derive(Default)]
pub struct ProfileUpdate<'a> {
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub profile_pic: Option<&'a str>,
}

/// Timestamps are stored as fixed-width RFC3339 so that text ordering
/// matches chronological ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by hand through the sqlite shell use datetime('now').
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .ok()
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let timestamp = parse_timestamp(&row.timestamp).unwrap_or_else(|| {
            warn!("Corrupt timestamp '{}' on message {}", row.timestamp, row.id);
            DateTime::default()
        });

        Message {
            id: row.id,
            content: row.content,
            image_url: row.image_url,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            group_id: row.group_id,
            timestamp,
            is_delivered: row.is_delivered,
            is_read: row.is_read,
            is_edited: row.is_edited,
            version: row.version,
        }
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let created_at = parse_timestamp(&row.created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on user {}", row.created_at, row.id);
            DateTime::default()
        });
        let updated_at = parse_timestamp(&row.updated_at).unwrap_or(created_at);
        let date_of_birth = row
            .date_of_birth
            .as_deref()
            .and_then(|raw| raw.parse::<NaiveDate>().ok());

        User {
            id: row.id,
            username: row.username,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth,
            profile_pic: row.profile_pic,
            is_active: row.is_active,
            created_at,
            updated_at,
        }
    }
}
