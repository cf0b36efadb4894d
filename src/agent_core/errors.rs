//! Agent Core error types.

use thiserror::Error;

/// Errors that can occur during chat store and action loop operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Chat not found.
    #[error("chat not found: '{chat_id}'")]
    ChatNotFound { chat_id: String },

    /// No message with this timestamp in the chat.
    #[error("message '{timestamp}' not found in chat '{chat_id}'")]
    MessageNotFound { chat_id: String, timestamp: String },

    /// No snapshot recorded for this message.
    #[error("no snapshot for message '{timestamp}'")]
    SnapshotNotFound { timestamp: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}
