//! Completion client error types.
//!
//! Each variant maps to one human-readable chat message via
//! [`InferenceError::user_message`]. Structured logging is the caller's
//! responsibility.

use thiserror::Error;

/// Errors that can occur while requesting a completion.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// HTTP 401 from the endpoint.
    #[error("unauthorized (HTTP 401)")]
    Unauthorized,

    /// HTTP 429 from the endpoint.
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    /// HTTP 5xx from the endpoint.
    #[error("server error (HTTP {status})")]
    ServerError { status: u16 },

    /// Non-2xx response whose body carried `error.message`.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Any other non-2xx response.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// 2xx response without `choices[0].message.content`.
    #[error("malformed completion response")]
    MalformedResponse,

    /// TCP/TLS/HTTP transport failure.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The endpoint did not answer in time.
    #[error("completion timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// The request was aborted before it finished.
    #[error("request cancelled")]
    Cancelled,

    /// No bearer token configured.
    #[error("no API key configured")]
    MissingApiKey,

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// The message shown in the chat panel for this failure.
    pub fn user_message(&self) -> String {
        match self {
            InferenceError::Unauthorized => {
                "Invalid API key. Please check your API key in settings.".to_string()
            }
            InferenceError::RateLimited => {
                "Rate limit exceeded. Please try again later.".to_string()
            }
            InferenceError::ServerError { .. } => {
                "Server error. Please try again later.".to_string()
            }
            InferenceError::Api { message, .. } => format!("API Error: {message}"),
            InferenceError::HttpError { status, .. } => {
                let reason = reqwest::StatusCode::from_u16(*status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown status");
                format!("API request failed: {reason}")
            }
            InferenceError::MalformedResponse => "Invalid response format from API".to_string(),
            InferenceError::ConnectionFailed { reason, .. } => format!("Network error: {reason}"),
            InferenceError::Timeout { duration_secs } => {
                format!("Network error: request timed out after {duration_secs}s")
            }
            InferenceError::Cancelled => "Request cancelled".to_string(),
            InferenceError::MissingApiKey => {
                "No API key configured. Set completion.api_key or WORKSPACE_ASSISTANT_API_KEY."
                    .to_string()
            }
            InferenceError::ConfigError { reason } => format!("Configuration error: {reason}"),
        }
    }

    /// Whether this error is the silent cancellation path.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InferenceError::Cancelled)
    }
}
