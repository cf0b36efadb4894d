//! Wire types for the remote chat-completion endpoint.
//!
//! Only `role` and `content` travel to the API; timestamps and other
//! bookkeeping stay in the chat store.

use serde::{Deserialize, Serialize};

use super::config::CompletionConfig;

// ─── Request Types ───────────────────────────────────────────────────────────

/// A single message as sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Database / wire string for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role string. Unknown values fall back to `User`.
    pub fn parse(s: &str) -> Self {
        match s {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// Request body for `POST {endpoint}`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl<'a> ChatCompletionRequest<'a> {
    /// Build a request from the configured sampling parameters.
    pub fn new(config: &'a CompletionConfig, messages: &'a [ChatMessage]) -> Self {
        Self {
            model: &config.model,
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
        }
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Successful response body. Every level is optional so a malformed shape
/// is detected by [`ChatCompletionResponse::first_content`] instead of by a
/// serde error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if present and non-empty.
    pub fn first_content(self) -> Option<String> {
        self.choices?
            .into_iter()
            .next()?
            .message?
            .content
            .filter(|c| !c.is_empty())
    }
}

/// Error body returned by the endpoint on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<ApiErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_all_sampling_fields() {
        let config = CompletionConfig::default();
        let messages = vec![
            ChatMessage::new(Role::System, "be brief"),
            ChatMessage::new(Role::User, "hi"),
        ];
        let req = ChatCompletionRequest::new(&config, &messages);
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["model"], "accounts/fireworks/models/deepseek-v3-0324");
        assert_eq!(json["max_tokens"], 20480);
        assert_eq!(json["top_k"], 40);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!(json["messages"][0].get("timestamp").is_none());
    }

    #[test]
    fn test_first_content_happy_path() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let resp: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.first_content().as_deref(), Some("hello"));
    }

    #[test]
    fn test_first_content_missing_fields() {
        for body in [
            r#"{}"#,
            r#"{"choices":[]}"#,
            r#"{"choices":[{}]}"#,
            r#"{"choices":[{"message":{}}]}"#,
            r#"{"choices":[{"message":{"content":""}}]}"#,
        ] {
            let resp: ChatCompletionResponse = serde_json::from_str(body).unwrap();
            assert!(resp.first_content().is_none(), "body should be malformed: {body}");
        }
    }

    #[test]
    fn test_role_round_trip_strings() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), role);
        }
        assert_eq!(Role::parse("tool"), Role::User);
    }
}
