//! Agent Core: chats, snapshots, and the action loop.
//!
//! Submodules:
//! - `conversation`: ChatStore, chat CRUD and message history
//! - `database`: SQLite persistence for chats, messages, snapshots
//! - `snapshot`: tracked-file set, snapshot capture and restore
//! - `action_parser`: action batch extraction from assistant replies
//! - `prompt`: system prompt and ambient editor context
//! - `interpreter`: the AgentLoop state machine
//! - `tokens`: token estimation and head/tail truncation
//! - `types`: shared types across the agent core
//! - `errors`: agent-level error types

pub mod action_parser;
pub mod conversation;
pub mod database;
pub mod errors;
pub mod interpreter;
pub mod prompt;
pub mod snapshot;
pub mod tokens;
pub mod types;

// Re-exports for convenience
pub use conversation::{lock_store, ChatDeletion, ChatStore};
pub use database::AgentDatabase;
pub use errors::AgentError;
pub use interpreter::{AgentLoop, LoopObserver, LoopOutcome};
pub use snapshot::{DeletionConfirmer, RestoreReport, TrackedFiles};
pub use types::{Chat, ChatSummary, FileSnapshot, Message, StateSnapshot};
