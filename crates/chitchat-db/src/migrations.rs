use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE,
                email           TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                first_name      TEXT NOT NULL DEFAULT '',
                last_name       TEXT NOT NULL DEFAULT '',
                date_of_birth   TEXT,
                profile_pic     TEXT NOT NULL DEFAULT '',
                is_active       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                content         TEXT NOT NULL,
                image_url       TEXT,
                sender_id       INTEGER NOT NULL REFERENCES users(id),
                receiver_id     INTEGER NOT NULL REFERENCES users(id),
                group_id        INTEGER,
                timestamp       TEXT NOT NULL,
                is_delivered    INTEGER NOT NULL DEFAULT 0,
                is_read         INTEGER NOT NULL DEFAULT 0,
                is_edited       INTEGER NOT NULL DEFAULT 0,
                is_deleted      INTEGER NOT NULL DEFAULT 0,
                version         INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX idx_messages_pair
                ON messages(sender_id, receiver_id, timestamp);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
