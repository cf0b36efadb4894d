//! ChatStore: persistent chat threads and their message history.
//!
//! Responsibilities:
//! - Chat CRUD with a single "current" chat and at least one chat always present
//! - Message append with unique, strictly increasing timestamps per chat
//! - System prompt refresh and history truncation for restore
//! - Building the `Vec<ChatMessage>` sent to the completion client

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::inference::types::{ChatMessage, Role};

use super::database::AgentDatabase;
use super::errors::AgentError;
use super::types::{Chat, ChatSummary, Message, StateSnapshot};

// ─── Timestamps ─────────────────────────────────────────────────────────────

/// Current UTC time as RFC 3339 with millisecond precision.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `now`, or one millisecond past `latest` when the clock has not moved on.
fn next_timestamp(latest: Option<&str>) -> String {
    let now = Utc::now();
    let floor = latest
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc) + Duration::milliseconds(1));

    let chosen = match floor {
        Some(floor) if floor > now => floor,
        _ => now,
    };
    chosen.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Lock a shared store. A panic in another holder does not corrupt the
/// database, so a poisoned lock is still usable.
pub fn lock_store(store: &Mutex<ChatStore>) -> MutexGuard<'_, ChatStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── ChatStore ──────────────────────────────────────────────────────────────

/// Outcome of [`ChatStore::delete_chat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDeletion {
    NotFound,
    /// The chat was removed. `current_changed` is set when it was the
    /// current chat and another one took its place.
    Deleted { current_changed: bool },
}

/// Manages chat threads, their messages, and per-message snapshots.
pub struct ChatStore {
    db: AgentDatabase,
    current_chat_id: String,
}

impl ChatStore {
    /// Wrap a database, creating a first chat if none exists. The first
    /// chat in creation order becomes current.
    pub fn open(db: AgentDatabase) -> Result<Self, AgentError> {
        let mut store = Self {
            db,
            current_chat_id: String::new(),
        };
        store.ensure_default_chat()?;
        Ok(store)
    }

    pub fn current_chat_id(&self) -> &str {
        &self.current_chat_id
    }

    // ─── Chat Management ────────────────────────────────────────────────

    /// Guarantee at least one chat exists and the current id points at one.
    pub fn ensure_default_chat(&mut self) -> Result<(), AgentError> {
        let chats = self.db.list_chats()?;
        if chats.is_empty() {
            self.create_chat(None)?;
            return Ok(());
        }
        if !chats.iter().any(|c| c.id == self.current_chat_id) {
            self.current_chat_id = chats[0].id.clone();
        }
        Ok(())
    }

    /// All chats in creation order.
    pub fn chats(&self) -> Result<Vec<ChatSummary>, AgentError> {
        self.db.list_chats()
    }

    /// The current chat with its full message list.
    pub fn current_chat(&self) -> Result<Chat, AgentError> {
        let summary =
            self.db
                .get_chat(&self.current_chat_id)?
                .ok_or_else(|| AgentError::ChatNotFound {
                    chat_id: self.current_chat_id.clone(),
                })?;
        Ok(Chat {
            messages: self.db.get_messages(&summary.id)?,
            id: summary.id,
            title: summary.title,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        })
    }

    /// Create a chat and make it current. A blank title becomes
    /// `Chat {n}` where `n` is the new number of chats.
    pub fn create_chat(&mut self, title: Option<&str>) -> Result<String, AgentError> {
        let id = uuid::Uuid::new_v4().to_string();
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => format!("Chat {}", self.db.chat_count()? + 1),
        };

        self.db.insert_chat(&id, &title, &now_timestamp())?;
        self.current_chat_id = id.clone();

        tracing::info!(chat_id = %id, title = %title, "chat created");
        Ok(id)
    }

    /// Make `chat_id` current. Returns `false` for an unknown id.
    pub fn switch_chat(&mut self, chat_id: &str) -> Result<bool, AgentError> {
        if self.db.get_chat(chat_id)?.is_none() {
            tracing::debug!(chat_id, "switch to unknown chat ignored");
            return Ok(false);
        }
        self.current_chat_id = chat_id.to_string();
        Ok(true)
    }

    /// Rename a chat. Returns `false` for an unknown id.
    pub fn rename_chat(&mut self, chat_id: &str, title: &str) -> Result<bool, AgentError> {
        self.db.rename_chat(chat_id, title, &now_timestamp())
    }

    /// Delete a chat with its messages and snapshots.
    ///
    /// Deleting the current chat moves to the first remaining one, or to a
    /// fresh chat when none remain.
    pub fn delete_chat(&mut self, chat_id: &str) -> Result<ChatDeletion, AgentError> {
        if !self.db.delete_chat(chat_id)? {
            return Ok(ChatDeletion::NotFound);
        }
        tracing::info!(chat_id, "chat deleted");

        if self.current_chat_id != chat_id {
            return Ok(ChatDeletion::Deleted {
                current_changed: false,
            });
        }

        match self.db.list_chats()?.into_iter().next() {
            Some(first) => self.current_chat_id = first.id,
            None => {
                self.create_chat(None)?;
            }
        }
        Ok(ChatDeletion::Deleted {
            current_changed: true,
        })
    }

    // ─── Messages ───────────────────────────────────────────────────────

    /// Append a message to a chat and bump its `updatedAt`.
    pub fn append_message(
        &self,
        chat_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<Message, AgentError> {
        self.require_chat(chat_id)?;

        let latest = self.db.max_timestamp(chat_id)?;
        let message = Message {
            role,
            content: content.into(),
            timestamp: next_timestamp(latest.as_deref()),
        };
        self.db.insert_message(chat_id, &message)?;
        self.db.touch_chat(chat_id, &message.timestamp)?;
        Ok(message)
    }

    /// Every message of a chat, system ones included.
    pub fn messages(&self, chat_id: &str) -> Result<Vec<Message>, AgentError> {
        self.db.get_messages(chat_id)
    }

    /// Messages shown in the panel: everything but the system role.
    pub fn display_messages(&self, chat_id: &str) -> Result<Vec<Message>, AgentError> {
        Ok(self
            .db
            .get_messages(chat_id)?
            .into_iter()
            .filter(|m| m.role != Role::System)
            .collect())
    }

    /// Conversation as sent to the completion endpoint.
    pub fn history(&self, chat_id: &str) -> Result<Vec<ChatMessage>, AgentError> {
        Ok(self
            .db
            .get_messages(chat_id)?
            .iter()
            .map(Message::to_chat_message)
            .collect())
    }

    /// Drop every non-system message of a chat.
    pub fn clear_conversation(&self, chat_id: &str) -> Result<(), AgentError> {
        let removed = self
            .db
            .delete_messages_by_role(chat_id, Role::System, true)?;
        self.db.delete_snapshots(chat_id, &removed)?;
        tracing::info!(chat_id, removed = removed.len(), "conversation cleared");
        Ok(())
    }

    /// Replace all system messages with `prompt`, placed first.
    pub fn refresh_system_prompt(&self, chat_id: &str, prompt: &str) -> Result<(), AgentError> {
        self.require_chat(chat_id)?;

        self.db.delete_messages_by_role(chat_id, Role::System, false)?;
        let latest = self.db.max_timestamp(chat_id)?;
        let message = Message {
            role: Role::System,
            content: prompt.to_string(),
            timestamp: next_timestamp(latest.as_deref()),
        };
        self.db.insert_message_first(chat_id, &message)?;
        Ok(())
    }

    /// Keep messages up to and including `timestamp`, dropping the
    /// snapshots of everything after it. Returns `false` when no message
    /// has that timestamp.
    pub fn truncate_after(&self, chat_id: &str, timestamp: &str) -> Result<bool, AgentError> {
        let Some(removed) = self.db.delete_messages_after(chat_id, timestamp)? else {
            return Ok(false);
        };
        self.db.delete_snapshots(chat_id, &removed)?;
        self.db.touch_chat(chat_id, &now_timestamp())?;
        tracing::info!(chat_id, removed = removed.len(), "conversation truncated");
        Ok(true)
    }

    // ─── Snapshots ──────────────────────────────────────────────────────

    pub fn save_snapshot(&self, snapshot: &StateSnapshot) -> Result<(), AgentError> {
        self.db.upsert_snapshot(snapshot)
    }

    pub fn snapshot(
        &self,
        chat_id: &str,
        message_timestamp: &str,
    ) -> Result<Option<StateSnapshot>, AgentError> {
        self.db.get_snapshot(chat_id, message_timestamp)
    }

    /// Snapshot for restoring to `message_timestamp`. The message must
    /// still be part of the chat.
    pub fn restore_point(
        &self,
        chat_id: &str,
        message_timestamp: &str,
    ) -> Result<StateSnapshot, AgentError> {
        let snapshot = self.db.get_snapshot(chat_id, message_timestamp)?.ok_or_else(|| {
            AgentError::SnapshotNotFound {
                timestamp: message_timestamp.to_string(),
            }
        })?;
        if !self.db.has_message(chat_id, message_timestamp)? {
            return Err(AgentError::MessageNotFound {
                chat_id: chat_id.to_string(),
                timestamp: message_timestamp.to_string(),
            });
        }
        Ok(snapshot)
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    fn require_chat(&self, chat_id: &str) -> Result<(), AgentError> {
        match self.db.get_chat(chat_id)? {
            Some(_) => Ok(()),
            None => Err(AgentError::ChatNotFound {
                chat_id: chat_id.to_string(),
            }),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
