use crate::Database;
use crate::error::unique_violation;
use crate::models::{MessageRow, NewMessage, NewUser, ProfileUpdate, UserRow, format_timestamp};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, email, password, first_name, last_name, date_of_birth, \
     profile_pic, is_active, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, content, image_url, sender_id, receiver_id, group_id, timestamp, \
     is_delivered, is_read, is_edited, is_deleted, version";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<i64> {
        let now = format_timestamp(chrono::Utc::now());
        let dob = user.date_of_birth.map(|d| d.to_string());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password, first_name, last_name, date_of_birth, profile_pic, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    user.username,
                    user.email,
                    user.password_hash,
                    user.first_name,
                    user.last_name,
                    dob,
                    user.profile_pic,
                    now,
                ],
            ).map_err(unique_violation)?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", &username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", &email))
    }

    /// All active accounts, oldest first.
    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false if no such user exists.
    pub fn update_profile(&self, id: i64, update: &ProfileUpdate<'_>) -> Result<bool> {
        let now = format_timestamp(chrono::Utc::now());
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET
                    first_name  = COALESCE(?2, first_name),
                    last_name   = COALESCE(?3, last_name),
                    email       = COALESCE(?4, email),
                    profile_pic = COALESCE(?5, profile_pic),
                    updated_at  = ?6
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    update.first_name,
                    update.last_name,
                    update.email,
                    update.profile_pic,
                    now,
                ],
            ).map_err(unique_violation)?;
            Ok(changed > 0)
        })
    }

    /// Deactivated accounts keep their rows so message history stays intact.
    pub fn deactivate_user(&self, id: i64) -> Result<bool> {
        let now = format_timestamp(chrono::Utc::now());
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
                rusqlite::params![id, now],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Insert and read back, so the caller sees the store-assigned id.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<MessageRow> {
        let ts = format_timestamp(msg.timestamp);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (content, image_url, sender_id, receiver_id, group_id, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    msg.content,
                    msg.image_url,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.group_id,
                    ts,
                ],
            )?;
            let id = tx.last_insert_rowid();
            let row = query_message(&tx, id)?
                .ok_or_else(|| anyhow::anyhow!("Inserted message {} vanished", id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Fetch a live (not soft-deleted) message.
    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Both directions of a two-party conversation, oldest first.
    pub fn get_conversation(&self, a: i64, b: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE is_deleted = 0
                   AND ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![a, b], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Set the delivered flag. Returns true only if the flag actually changed.
    pub fn mark_delivered(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_delivered = 1, version = version + 1
                 WHERE id = ?1 AND is_delivered = 0 AND is_deleted = 0",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Set the read flag. Returns true only if the flag actually changed.
    pub fn mark_read(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1, version = version + 1
                 WHERE id = ?1 AND is_read = 0 AND is_deleted = 0",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Replace content if the row is still at `expected_version`.
    /// Returns false when another writer got there first.
    pub fn update_content(&self, id: i64, content: &str, expected_version: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET content = ?2, is_edited = 1, version = version + 1
                 WHERE id = ?1 AND version = ?3 AND is_deleted = 0",
                rusqlite::params![id, content, expected_version],
            )?;
            Ok(changed > 0)
        })
    }

    /// Soft delete if the row is still at `expected_version`.
    pub fn soft_delete_message(&self, id: i64, expected_version: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_deleted = 1, version = version + 1
                 WHERE id = ?1 AND version = ?2 AND is_deleted = 0",
                rusqlite::params![id, expected_version],
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &dyn rusqlite::ToSql) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;
    let row = stmt.query_row([value], map_user).optional()?;
    Ok(row)
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND is_deleted = 0"
    ))?;
    let row = stmt.query_row([id], map_message).optional()?;
    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        date_of_birth: row.get(6)?,
        profile_pic: row.get(7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        content: row.get(1)?,
        image_url: row.get(2)?,
        sender_id: row.get(3)?,
        receiver_id: row.get(4)?,
        group_id: row.get(5)?,
        timestamp: row.get(6)?,
        is_delivered: row.get(7)?,
        is_read: row.get(8)?,
        is_edited: row.get(9)?,
        is_deleted: row.get(10)?,
        version: row.get(11)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
