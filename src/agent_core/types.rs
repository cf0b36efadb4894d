//! Shared types for the agent core.
//!
//! Chats, their messages, and the per-message state snapshots used by
//! restore. Field names serialize in camelCase because these structs travel
//! to the panel as-is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::inference::types::{ChatMessage, Role};

// ─── Messages ───────────────────────────────────────────────────────────────

/// A single message stored in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// RFC 3339 timestamp with milliseconds. Unique within its chat; the
    /// panel uses it as the message id for restore.
    pub timestamp: String,
}

impl Message {
    /// Strip bookkeeping for transmission to the completion endpoint.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

// ─── Chats ──────────────────────────────────────────────────────────────────

/// Chat metadata as listed in the panel's chat switcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: usize,
}

/// A chat with its full message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: String,
    pub updated_at: String,
}

// ─── Snapshots ──────────────────────────────────────────────────────────────

/// Captured state of one open document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub exists: bool,
    pub content: String,
    pub version: i64,
}

/// Workspace state captured just before a user message was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub chat_id: String,
    /// Timestamp of the user message this snapshot precedes.
    pub message_timestamp: String,
    pub taken_at: String,
    /// Active document at capture time, if it was among the open ones.
    pub primary_file: Option<String>,
    /// Files touched since the previous snapshot.
    pub tracked_files: Vec<String>,
    /// Open documents keyed by absolute path.
    pub files: BTreeMap<String, FileSnapshot>,
}
