//! SQLite database for chats, messages, and state snapshots.
//!
//! Uses `rusqlite` in synchronous mode; callers hold it behind a mutex and
//! never across an await point. WAL mode is enabled so a second process
//! (or a debugging shell) can read while the assistant writes.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};

use super::errors::AgentError;
use super::types::{ChatSummary, FileSnapshot, Message, StateSnapshot};
use crate::inference::types::Role;

// ─── Database ───────────────────────────────────────────────────────────────

/// SQLite database handle for the agent core.
pub struct AgentDatabase {
    conn: Connection,
}

impl AgentDatabase {
    /// Open (or create) the agent database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self { conn };
        db.create_tables()?;
        Ok(db)
    }

    /// Create all required tables if they don't exist.
    fn create_tables(&self) -> Result<(), AgentError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                position INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat
                ON messages(chat_id, seq);

            CREATE TABLE IF NOT EXISTS snapshots (
                chat_id TEXT NOT NULL,
                message_timestamp TEXT NOT NULL,
                taken_at TEXT NOT NULL,
                primary_file TEXT,
                tracked_files TEXT NOT NULL DEFAULT '[]',
                files TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (chat_id, message_timestamp)
            );
            ",
        )?;
        Ok(())
    }

    // ─── Chats ──────────────────────────────────────────────────────────

    /// Insert a chat at the end of the chat list.
    pub fn insert_chat(&self, id: &str, title: &str, now: &str) -> Result<(), AgentError> {
        self.conn.execute(
            "INSERT INTO chats (id, title, created_at, updated_at, position)
             VALUES (?1, ?2, ?3, ?3, (SELECT COALESCE(MAX(position), 0) + 1 FROM chats))",
            params![id, title, now],
        )?;
        Ok(())
    }

    /// Get one chat's metadata.
    pub fn get_chat(&self, chat_id: &str) -> Result<Option<ChatSummary>, AgentError> {
        let result = self
            .conn
            .query_row(
                "SELECT c.id, c.title, c.created_at, c.updated_at,
                        (SELECT COUNT(*) FROM messages m WHERE m.chat_id = c.id)
                 FROM chats c WHERE c.id = ?1",
                params![chat_id],
                row_to_summary,
            )
            .optional()?;
        Ok(result)
    }

    /// List all chats in creation order.
    pub fn list_chats(&self) -> Result<Vec<ChatSummary>, AgentError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.title, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.chat_id = c.id)
             FROM chats c
             ORDER BY c.position ASC",
        )?;

        let rows = stmt.query_map([], row_to_summary)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    pub fn chat_count(&self) -> Result<usize, AgentError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Set a chat's title. Returns `false` when the chat does not exist.
    pub fn rename_chat(&self, chat_id: &str, title: &str, now: &str) -> Result<bool, AgentError> {
        let updated = self.conn.execute(
            "UPDATE chats SET title = ?2, updated_at = ?3 WHERE id = ?1",
            params![chat_id, title, now],
        )?;
        Ok(updated > 0)
    }

    /// Bump a chat's `updated_at`.
    pub fn touch_chat(&self, chat_id: &str, now: &str) -> Result<(), AgentError> {
        self.conn.execute(
            "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
            params![chat_id, now],
        )?;
        Ok(())
    }

    /// Delete a chat, its messages, and its snapshots. Returns `false`
    /// when the chat does not exist.
    pub fn delete_chat(&self, chat_id: &str) -> Result<bool, AgentError> {
        self.conn.execute(
            "DELETE FROM snapshots WHERE chat_id = ?1",
            params![chat_id],
        )?;
        self.conn.execute(
            "DELETE FROM messages WHERE chat_id = ?1",
            params![chat_id],
        )?;
        let deleted = self
            .conn
            .execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;
        Ok(deleted > 0)
    }

    // ─── Messages ───────────────────────────────────────────────────────

    /// Append a message after the chat's last one.
    pub fn insert_message(&self, chat_id: &str, msg: &Message) -> Result<i64, AgentError> {
        self.conn.execute(
            "INSERT INTO messages (chat_id, seq, role, content, timestamp)
             VALUES (?1,
                     (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE chat_id = ?1),
                     ?2, ?3, ?4)",
            params![chat_id, msg.role.as_str(), msg.content, msg.timestamp],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a message before every existing message of the chat.
    pub fn insert_message_first(&self, chat_id: &str, msg: &Message) -> Result<i64, AgentError> {
        self.conn.execute(
            "INSERT INTO messages (chat_id, seq, role, content, timestamp)
             VALUES (?1,
                     (SELECT COALESCE(MIN(seq), 1) - 1 FROM messages WHERE chat_id = ?1),
                     ?2, ?3, ?4)",
            params![chat_id, msg.role.as_str(), msg.content, msg.timestamp],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All messages of a chat, in conversation order.
    pub fn get_messages(&self, chat_id: &str) -> Result<Vec<Message>, AgentError> {
        let mut stmt = self.conn.prepare(
            "SELECT role, content, timestamp
             FROM messages
             WHERE chat_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![chat_id], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Greatest message timestamp in a chat.
    pub fn max_timestamp(&self, chat_id: &str) -> Result<Option<String>, AgentError> {
        let ts: Option<String> = self.conn.query_row(
            "SELECT MAX(timestamp) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(ts)
    }

    /// Sequence number of the message with this timestamp, if present.
    fn message_seq(&self, chat_id: &str, timestamp: &str) -> Result<Option<i64>, AgentError> {
        let seq = self
            .conn
            .query_row(
                "SELECT seq FROM messages WHERE chat_id = ?1 AND timestamp = ?2",
                params![chat_id, timestamp],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq)
    }

    pub fn has_message(&self, chat_id: &str, timestamp: &str) -> Result<bool, AgentError> {
        Ok(self.message_seq(chat_id, timestamp)?.is_some())
    }

    /// Delete every message after the one with `timestamp`.
    ///
    /// Returns the timestamps of the removed messages, or `None` when no
    /// message has that timestamp.
    pub fn delete_messages_after(
        &self,
        chat_id: &str,
        timestamp: &str,
    ) -> Result<Option<Vec<String>>, AgentError> {
        let Some(seq) = self.message_seq(chat_id, timestamp)? else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT timestamp FROM messages WHERE chat_id = ?1 AND seq > ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, seq], |row| row.get::<_, String>(0))?;
        let mut removed = Vec::new();
        for row in rows {
            removed.push(row?);
        }

        self.conn.execute(
            "DELETE FROM messages WHERE chat_id = ?1 AND seq > ?2",
            params![chat_id, seq],
        )?;
        Ok(Some(removed))
    }

    /// Delete messages of `role`, or of every other role when `all_but` is set.
    ///
    /// Returns the timestamps of the removed messages.
    pub fn delete_messages_by_role(
        &self,
        chat_id: &str,
        role: Role,
        all_but: bool,
    ) -> Result<Vec<String>, AgentError> {
        let op = if all_but { "!=" } else { "=" };
        let select = format!("SELECT timestamp FROM messages WHERE chat_id = ?1 AND role {op} ?2");
        let mut stmt = self.conn.prepare(&select)?;
        let rows = stmt.query_map(params![chat_id, role.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut removed = Vec::new();
        for row in rows {
            removed.push(row?);
        }

        let delete = format!("DELETE FROM messages WHERE chat_id = ?1 AND role {op} ?2");
        self.conn.execute(&delete, params![chat_id, role.as_str()])?;
        Ok(removed)
    }

    // ─── Snapshots ──────────────────────────────────────────────────────

    /// Store a snapshot, replacing any earlier one for the same message.
    pub fn upsert_snapshot(&self, snapshot: &StateSnapshot) -> Result<(), AgentError> {
        let tracked = serde_json::to_string(&snapshot.tracked_files)?;
        let files = serde_json::to_string(&snapshot.files)?;

        self.conn.execute(
            "INSERT OR REPLACE INTO snapshots
             (chat_id, message_timestamp, taken_at, primary_file, tracked_files, files)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.chat_id,
                snapshot.message_timestamp,
                snapshot.taken_at,
                snapshot.primary_file,
                tracked,
                files,
            ],
        )?;
        Ok(())
    }

    /// Look up the snapshot taken before a message.
    pub fn get_snapshot(
        &self,
        chat_id: &str,
        message_timestamp: &str,
    ) -> Result<Option<StateSnapshot>, AgentError> {
        let row = self
            .conn
            .query_row(
                "SELECT chat_id, message_timestamp, taken_at, primary_file, tracked_files, files
                 FROM snapshots WHERE chat_id = ?1 AND message_timestamp = ?2",
                params![chat_id, message_timestamp],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((chat_id, message_timestamp, taken_at, primary_file, tracked, files)) = row
        else {
            return Ok(None);
        };

        Ok(Some(StateSnapshot {
            chat_id,
            message_timestamp,
            taken_at,
            primary_file,
            tracked_files: serde_json::from_str(&tracked)?,
            files: serde_json::from_str::<BTreeMap<String, FileSnapshot>>(&files)?,
        }))
    }

    /// Remove the snapshots keyed by the given message timestamps.
    pub fn delete_snapshots(&self, chat_id: &str, timestamps: &[String]) -> Result<usize, AgentError> {
        let mut removed = 0;
        for ts in timestamps {
            removed += self.conn.execute(
                "DELETE FROM snapshots WHERE chat_id = ?1 AND message_timestamp = ?2",
                params![chat_id, ts],
            )?;
        }
        Ok(removed)
    }

    #[cfg(test)]
    pub fn snapshot_count(&self) -> Result<usize, AgentError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSummary> {
    Ok(ChatSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        message_count: row.get::<_, i64>(4)? as usize,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        role: Role::parse(&row.get::<_, String>(0)?),
        content: row.get(1)?,
        timestamp: row.get(2)?,
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
