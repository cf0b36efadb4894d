//! Host editor surface.
//!
//! The assistant never owns the editor. Everything it needs from one
//! (workspace root, file IO, search, open documents, selection, terminals)
//! goes through [`HostEditor`]. [`local::LocalWorkspace`] is the
//! filesystem-backed implementation used by the stdio server; editor
//! state (open documents, selection, terminals) is pushed into it by the
//! panel driver.

pub mod local;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::{DocumentRef, EditorState, LocalWorkspace};

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Errors surfaced by a host implementation.
#[derive(Debug, Error)]
pub enum HostError {
    /// Filesystem operation failed.
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A glob or search pattern could not be compiled.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// No workspace root is available for a root-relative operation.
    #[error("no workspace folder is open")]
    NoWorkspace,

    /// A blocking search task panicked or was cancelled.
    #[error("search task failed: {reason}")]
    TaskFailed { reason: String },
}

impl HostError {
    pub(crate) fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        HostError::Io {
            op,
            path: path.display().to_string(),
            source,
        }
    }
}

// ─── Editor state types ─────────────────────────────────────────────────────

/// A document open in the editor, with its full text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDocument {
    pub path: String,
    #[serde(default)]
    pub language_id: Option<String>,
    #[serde(default)]
    pub version: i64,
    pub text: String,
}

/// Selected range in the active editor (1-based, inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// The focused editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEditor {
    pub path: String,
    #[serde(default)]
    pub language_id: Option<String>,
    /// Non-empty selection, if any.
    #[serde(default)]
    pub selection: Option<Selection>,
    /// Cursor line (1-based).
    #[serde(default = "default_cursor_line")]
    pub cursor_line: usize,
}

fn default_cursor_line() -> usize {
    1
}

/// Most recent document edit reported by the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentEdit {
    pub path: String,
    /// RFC 3339 time of the edit.
    pub at: String,
}

/// One full-text search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    /// Workspace-relative path.
    pub path: String,
    /// 1-based line number.
    pub line: usize,
    /// The matching line, trimmed.
    pub text: String,
}

// ─── Capability trait ───────────────────────────────────────────────────────

/// Everything the assistant consumes from the host editor.
///
/// Paths handed to the file methods are already resolved (absolute).
#[async_trait]
pub trait HostEditor: Send + Sync {
    /// First workspace folder, if one is open.
    fn workspace_root(&self) -> Option<PathBuf>;

    async fn read_text(&self, path: &Path) -> Result<String, HostError>;

    /// Write a file, creating parent directories as needed.
    async fn write_text(&self, path: &Path, content: &str) -> Result<(), HostError>;

    /// Delete a file. Returns `false` when it did not exist.
    async fn delete_file(&self, path: &Path) -> Result<bool, HostError>;

    /// Workspace-relative paths matching `glob`, at most `limit`.
    async fn find_files(&self, glob: &str, limit: usize) -> Result<Vec<String>, HostError>;

    /// Lines containing `needle` across the workspace, at most `limit`.
    async fn find_text_matches(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<TextMatch>, HostError>;

    /// Documents currently open in the editor.
    async fn open_documents(&self) -> Vec<OpenDocument>;

    /// The focused editor and its selection.
    fn active_editor(&self) -> Option<ActiveEditor>;

    /// Names of the open terminals.
    fn terminals(&self) -> Vec<String>;

    fn recent_edit(&self) -> Option<RecentEdit>;

    /// Resolve an action path: absolute as-is, otherwise relative to the
    /// workspace root, otherwise relative to the process cwd.
    fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            return candidate;
        }
        match self.workspace_root() {
            Some(root) => root.join(candidate),
            None => {
                tracing::warn!(path, "no workspace root available, resolving against cwd");
                std::env::current_dir().unwrap_or_default().join(candidate)
            }
        }
    }
}
