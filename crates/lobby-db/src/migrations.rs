use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         TEXT NOT NULL,
            user_email      TEXT NOT NULL DEFAULT '',
            content         TEXT NOT NULL,
            message_type    TEXT NOT NULL DEFAULT 'text',
            file_url        TEXT,
            file_name       TEXT,
            file_type       TEXT,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_created
            ON messages(created_at, id);

        CREATE TABLE IF NOT EXISTS profiles (
            user_id     TEXT PRIMARY KEY,
            username    TEXT NOT NULL,
            email       TEXT NOT NULL DEFAULT '',
            avatar_url  TEXT,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
