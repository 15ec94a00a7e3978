use crate::Database;
use crate::models::{ConversationRow, MessageRow, MessageSummaryRow, UserRow};
use anyhow::{Result, anyhow};
use rusqlite::Connection;

/// Returns the participant pair in canonical storage order (smaller UUID
/// string first), so lookups are order-insensitive.
pub fn canonical_pair<'a>(user_a: &'a str, user_b: &'a str) -> (&'a str, &'a str) {
    if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("User not found: {}", id))
        })
    }

    /// All users except the caller — the sidebar's partner list.
    pub fn list_users_except(&self, id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, created_at FROM users
                 WHERE id != ?1 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([id], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Conversations --

    pub fn find_conversation(&self, user_a: &str, user_b: &str) -> Result<Option<ConversationRow>> {
        let (a, b) = canonical_pair(user_a, user_b);
        self.with_conn(|conn| query_conversation(conn, a, b))
    }

    /// Find-or-create for the unordered pair. The UNIQUE(participant_a,
    /// participant_b) constraint plus INSERT OR IGNORE makes this atomic:
    /// racing callers converge on one row and `id` is only used by the
    /// caller that actually inserts.
    pub fn find_or_create_conversation(
        &self,
        id: &str,
        user_a: &str,
        user_b: &str,
    ) -> Result<ConversationRow> {
        let (a, b) = canonical_pair(user_a, user_b);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversations (id, participant_a, participant_b)
                 VALUES (?1, ?2, ?3)",
                (id, a, b),
            )?;
            query_conversation(conn, a, b)?
                .ok_or_else(|| anyhow!("Conversation vanished after upsert: ({}, {})", a, b))
        })
    }

    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, participant_a, participant_b, created_at FROM conversations
                 WHERE participant_a = ?1 OR participant_b = ?1",
            )?;
            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, conversation_id, sender_id, receiver_id, content, created_at),
            )?;
            Ok(())
        })
    }

    /// Full history for a conversation, oldest first (send order). The rowid
    /// tie-break keeps insertion order when two messages share a timestamp.
    pub fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, receiver_id, content, read, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Count of unread messages from `sender_id` to `receiver_id`.
    /// This is the source of truth for unread badges — recomputed on every
    /// call, never cached.
    pub fn count_unread_from(&self, sender_id: &str, receiver_id: &str) -> Result<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
                (sender_id, receiver_id),
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Bulk-flip all unread messages from `sender_id` to `receiver_id`.
    /// A single set-based UPDATE, atomic under SQLite. Returns the number of
    /// rows changed; zero is fine (already read).
    pub fn mark_read_from(&self, sender_id: &str, receiver_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
                (sender_id, receiver_id),
            )?;
            Ok(changed)
        })
    }

    /// Most recent messages involving `user_id`, newest first, with rowid as
    /// the tie-break on equal timestamps.
    /// JOINs users twice to fetch both display names in a single query
    /// (eliminates N+1).
    pub fn recent_messages_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, su.username, m.receiver_id, ru.username,
                        m.content, m.read, m.created_at
                 FROM messages m
                 LEFT JOIN users su ON m.sender_id = su.id
                 LEFT JOIN users ru ON m.receiver_id = ru.id
                 WHERE m.sender_id = ?1 OR m.receiver_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], |row| {
                    Ok(MessageSummaryRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        sender_name: row
                            .get::<_, Option<String>>(2)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        receiver_id: row.get(3)?,
                        receiver_name: row
                            .get::<_, Option<String>>(4)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        content: row.get(5)?,
                        read: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt.query_row([username], map_user_row).optional()?;
    Ok(row)
}

fn query_conversation(conn: &Connection, a: &str, b: &str) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, participant_a, participant_b, created_at FROM conversations
         WHERE participant_a = ?1 AND participant_b = ?2",
    )?;

    let row = stmt.query_row([a, b], map_conversation_row).optional()?;
    Ok(row)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        read: row.get(5)?,
        created_at: row.get(6)?,
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
