//! Workspace snapshots taken before each user message, and restore.
//!
//! A snapshot only covers documents open in the editor at capture time.
//! Files touched by actions but never opened are tracked for deletion on
//! restore but their content is not captured.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::host::HostEditor;

use super::conversation::now_timestamp;
use super::types::{FileSnapshot, StateSnapshot};

// ─── Tracked Files ──────────────────────────────────────────────────────────

/// Paths created or modified since the last snapshot.
///
/// Shared between the session (editor events) and the action executor
/// (`write` / `edit`).
#[derive(Debug, Default)]
pub struct TrackedFiles {
    paths: Mutex<BTreeSet<String>>,
}

impl TrackedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, path: impl Into<String>) {
        self.lock().insert(path.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains(path)
    }

    /// Current set in sorted order.
    pub fn to_vec(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Replace the whole set.
    pub fn reset<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self.lock();
        guard.clear();
        guard.extend(paths.into_iter().map(Into::into));
    }
}

// ─── Capture ────────────────────────────────────────────────────────────────

/// Capture every open document for the message at `message_timestamp`,
/// then reset the tracked set to the open documents' paths.
pub async fn take_snapshot(
    host: &dyn HostEditor,
    tracked: &TrackedFiles,
    chat_id: &str,
    message_timestamp: &str,
) -> StateSnapshot {
    let documents = host.open_documents().await;

    let mut snapshot = StateSnapshot {
        chat_id: chat_id.to_string(),
        message_timestamp: message_timestamp.to_string(),
        taken_at: now_timestamp(),
        primary_file: None,
        tracked_files: tracked.to_vec(),
        files: Default::default(),
    };

    for doc in &documents {
        snapshot.files.insert(
            doc.path.clone(),
            FileSnapshot {
                exists: true,
                content: doc.text.clone(),
                version: doc.version,
            },
        );
    }

    snapshot.primary_file = host
        .active_editor()
        .map(|editor| editor.path)
        .filter(|path| snapshot.files.contains_key(path));

    tracked.reset(documents.into_iter().map(|d| d.path));

    tracing::debug!(
        chat_id,
        message = message_timestamp,
        files = snapshot.files.len(),
        tracked = snapshot.tracked_files.len(),
        "state snapshot taken"
    );
    snapshot
}

// ─── Restore ────────────────────────────────────────────────────────────────

/// Asks the user whether files created after a snapshot may be deleted.
#[async_trait]
pub trait DeletionConfirmer: Send + Sync {
    async fn confirm_deletion(&self, paths: &[String]) -> bool;
}

/// What a restore did to the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Files rewritten to their captured content.
    pub restored: usize,
    /// Files deleted after confirmation.
    pub deleted: usize,
    /// Existing files offered for deletion.
    pub offered: Vec<String>,
    pub primary_file: Option<String>,
}

/// Put the workspace back to `snapshot`.
///
/// Existing files tracked now but neither tracked nor captured at snapshot
/// time are offered for deletion through `confirmer`; nothing is deleted
/// without approval. Every captured
/// file is rewritten. IO failures are logged and the rest continues. The
/// tracked set ends up equal to the snapshot's.
pub async fn restore_files(
    host: &dyn HostEditor,
    tracked: &TrackedFiles,
    snapshot: &StateSnapshot,
    confirmer: &dyn DeletionConfirmer,
) -> RestoreReport {
    let mut report = RestoreReport {
        primary_file: snapshot.primary_file.clone(),
        ..Default::default()
    };

    let known: BTreeSet<&str> = snapshot.tracked_files.iter().map(String::as_str).collect();
    let mut created_after = Vec::new();
    for path in tracked.to_vec() {
        // Captured files get rewritten below, never offered for deletion
        if known.contains(path.as_str()) || snapshot.files.contains_key(&path) {
            continue;
        }
        if tokio::fs::try_exists(Path::new(&path)).await.unwrap_or(false) {
            created_after.push(path);
        }
    }

    if !created_after.is_empty() && confirmer.confirm_deletion(&created_after).await {
        for path in &created_after {
            match host.delete_file(Path::new(path)).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(path = %path, error = %e, "failed to delete file"),
            }
        }
    }
    report.offered = created_after;

    for (path, file) in &snapshot.files {
        if !file.exists {
            continue;
        }
        match host.write_text(Path::new(path), &file.content).await {
            Ok(()) => report.restored += 1,
            Err(e) => tracing::warn!(path = %path, error = %e, "failed to restore file"),
        }
    }

    tracked.reset(snapshot.tracked_files.iter().cloned());

    tracing::info!(
        chat_id = %snapshot.chat_id,
        message = %snapshot.message_timestamp,
        restored = report.restored,
        deleted = report.deleted,
        "workspace restored"
    );
    report
}

// ─── Tests ──────────────────────────────────────────────────────────────────
