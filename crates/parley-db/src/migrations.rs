use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Participants are stored in canonical order (smaller UUID first).
        -- The UNIQUE constraint makes find-or-create atomic: two concurrent
        -- first sends for the same pair cannot create two conversations.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            participant_a   TEXT NOT NULL REFERENCES users(id),
            participant_b   TEXT NOT NULL REFERENCES users(id),
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(participant_a, participant_b)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            receiver_id     TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            read            INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        -- Unread counts are derived on every query; this index keeps the
        -- count cheap.
        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, sender_id, read);

        CREATE INDEX IF NOT EXISTS idx_messages_recent
            ON messages(created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
