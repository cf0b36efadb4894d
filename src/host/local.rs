//! Filesystem-backed host editor.
//!
//! File IO and search run against a workspace directory. Editor-only state
//! (open documents, active selection, terminals, last edit) has no
//! filesystem equivalent, so the panel driver pushes it in with
//! [`LocalWorkspace::set_editor_state`].

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use globset::GlobBuilder;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use super::{ActiveEditor, HostEditor, HostError, OpenDocument, RecentEdit, TextMatch};
use crate::agent_core::tokens::truncate_utf8;

/// Files larger than this are skipped by text search.
const MAX_SEARCH_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Longest line excerpt returned per text match.
const MAX_MATCH_LINE_BYTES: usize = 200;

// ─── Editor State ───────────────────────────────────────────────────────────

/// A document the editor reports as open. `text` is omitted when the
/// buffer matches the file on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub path: String,
    #[serde(default)]
    pub language_id: Option<String>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub text: Option<String>,
}

/// Editor state as last reported by the panel driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorState {
    #[serde(default)]
    pub active_editor: Option<ActiveEditor>,
    #[serde(default)]
    pub open_documents: Vec<DocumentRef>,
    #[serde(default)]
    pub terminals: Vec<String>,
    #[serde(default)]
    pub recent_edit: Option<RecentEdit>,
}

// ─── LocalWorkspace ─────────────────────────────────────────────────────────

pub struct LocalWorkspace {
    root: Option<PathBuf>,
    state: RwLock<EditorState>,
}

impl LocalWorkspace {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            state: RwLock::new(EditorState::default()),
        }
    }

    /// Replace the editor state wholesale.
    pub fn set_editor_state(&self, state: EditorState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }

    pub fn editor_state(&self) -> EditorState {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn require_root(&self) -> Result<PathBuf, HostError> {
        self.root.clone().ok_or(HostError::NoWorkspace)
    }
}

#[async_trait]
impl HostEditor for LocalWorkspace {
    fn workspace_root(&self) -> Option<PathBuf> {
        self.root.clone()
    }

    async fn read_text(&self, path: &Path) -> Result<String, HostError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HostError::io("read", path, e))
    }

    async fn write_text(&self, path: &Path, content: &str) -> Result<(), HostError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HostError::io("create directory", parent, e))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| HostError::io("write", path, e))
    }

    async fn delete_file(&self, path: &Path) -> Result<bool, HostError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HostError::io("delete", path, e)),
        }
    }

    async fn find_files(&self, glob: &str, limit: usize) -> Result<Vec<String>, HostError> {
        let root = self.require_root()?;
        let matcher = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()
            .map_err(|e| HostError::InvalidPattern {
                pattern: glob.to_string(),
                reason: e.to_string(),
            })?
            .compile_matcher();

        tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            for (_, rel) in walk_files(&root) {
                if found.len() >= limit {
                    break;
                }
                if matcher.is_match(&rel) {
                    found.push(rel);
                }
            }
            found
        })
        .await
        .map_err(|e| HostError::TaskFailed {
            reason: e.to_string(),
        })
    }

    async fn find_text_matches(
        &self,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<TextMatch>, HostError> {
        if needle.is_empty() {
            return Err(HostError::InvalidPattern {
                pattern: String::new(),
                reason: "search text is empty".to_string(),
            });
        }
        let root = self.require_root()?;
        let needle = needle.to_string();

        tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            'files: for (abs, rel) in walk_files(&root) {
                let too_big = std::fs::metadata(&abs)
                    .map(|m| m.len() > MAX_SEARCH_FILE_BYTES)
                    .unwrap_or(true);
                if too_big {
                    continue;
                }
                // Binary and non-UTF-8 files are skipped
                let Ok(text) = std::fs::read_to_string(&abs) else {
                    continue;
                };
                for (idx, line) in text.lines().enumerate() {
                    if matches.len() >= limit {
                        break 'files;
                    }
                    if line.contains(&needle) {
                        matches.push(TextMatch {
                            path: rel.clone(),
                            line: idx + 1,
                            text: truncate_utf8(line.trim(), MAX_MATCH_LINE_BYTES).to_string(),
                        });
                    }
                }
            }
            matches
        })
        .await
        .map_err(|e| HostError::TaskFailed {
            reason: e.to_string(),
        })
    }

    async fn open_documents(&self) -> Vec<OpenDocument> {
        let refs = self.editor_state().open_documents;
        let mut docs = Vec::with_capacity(refs.len());

        for doc in refs {
            let path = self.resolve_path(&doc.path);
            let text = match doc.text {
                Some(text) => text,
                None => match tokio::fs::read_to_string(&path).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "open document unreadable");
                        continue;
                    }
                },
            };
            docs.push(OpenDocument {
                path: path.display().to_string(),
                language_id: doc.language_id,
                version: doc.version,
                text,
            });
        }
        docs
    }

    fn active_editor(&self) -> Option<ActiveEditor> {
        self.editor_state().active_editor
    }

    fn terminals(&self) -> Vec<String> {
        self.editor_state().terminals
    }

    fn recent_edit(&self) -> Option<RecentEdit> {
        self.editor_state().recent_edit
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Regular files under `root` as (absolute, `/`-separated relative) pairs,
/// honoring `.gitignore` and skipping hidden entries, in name order.
fn walk_files(root: &Path) -> impl Iterator<Item = (PathBuf, String)> + '_ {
    WalkBuilder::new(root)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter_map(move |entry| {
            let rel = entry.path().strip_prefix(root).ok()?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            Some((entry.path().to_path_buf(), rel))
        })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
