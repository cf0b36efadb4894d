//! Completion client: speaks an OpenAI-style chat-completions API.
//!
//! - `client`: one-shot POST with bearer auth, abortable
//! - `config`: YAML configuration with env-var interpolation
//! - `errors`: failure taxonomy and the chat-facing message for each
//! - `types`: request / response wire types

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

pub use client::{ChatCompletion, CompletionClient};
pub use config::{AgentConfig, AssistantConfig, CompletionConfig};
pub use errors::InferenceError;
pub use types::{ChatMessage, Role};
