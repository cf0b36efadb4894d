//! Action execution error types.
//!
//! The `Display` text of each variant is exactly what the model sees in the
//! action's `{"error": ...}` result.

use thiserror::Error;

use crate::host::HostError;

#[derive(Debug, Error)]
pub enum ActionError {
    /// A required field is missing from the action's `data`.
    #[error("Missing required field '{field}' for {action} action")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    /// The action's `data` does not have the expected shape.
    #[error("Invalid data for {action} action: {reason}")]
    InvalidData { action: &'static str, reason: String },

    /// Host file or search operation failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Local IO failure outside the host (temp files, process pipes).
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// `execute` with a language that has no extension mapping.
    #[error("Unsupported language: {language}")]
    UnsupportedLanguage { language: String },

    /// The language is known but its runner could not be started.
    #[error("Execution of {language} is not supported: {reason}")]
    ExecutionNotSupported { language: String, reason: String },

    /// The process exited unsuccessfully.
    #[error("Command failed (exit {}): {stderr}", exit_label(.code))]
    CommandFailed { code: Option<i32>, stderr: String },

    /// The process ran past its deadline and was killed.
    #[error("Command timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The process wrote more than the stdout cap.
    #[error("Command output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    /// An edit regex failed to compile.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Web or workspace search failure.
    #[error("{reason}")]
    Search { reason: String },

    /// The action type is not one the executor knows.
    #[error("Unknown action type: {action_type}")]
    UnknownAction { action_type: String },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}
