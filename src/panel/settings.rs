//! Panel settings persisted across restarts.
//!
//! Stored as `settings.json` in the data directory. A missing or corrupt
//! file yields defaults; saves go through a temp file and a rename.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::i18n::Language;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PanelSettings {
    pub language: Language,
}

impl PanelSettings {
    /// Load from `dir` or return defaults.
    pub fn load_or_default(dir: &Path) -> Self {
        let path = Self::persist_path(dir);
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(settings) => {
                    tracing::info!(path = %path.display(), language = settings.language.code(), "loaded panel settings");
                    settings
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse panel settings, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to read panel settings, using defaults");
                Self::default()
            }
        }
    }

    /// Save to `dir` (atomic write). Failures are logged.
    pub fn save(&self, dir: &Path) {
        let path = Self::persist_path(dir);
        let content = match serde_json::to_string_pretty(self) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize panel settings");
                return;
            }
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::error!(error = %e, dir = %dir.display(), "failed to create settings directory");
            return;
        }
        let tmp_path = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, &content) {
            tracing::error!(error = %e, "failed to write panel settings temp file");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            tracing::error!(error = %e, "failed to rename panel settings file");
            return;
        }
        tracing::debug!(language = self.language.code(), "saved panel settings");
    }

    fn persist_path(dir: &Path) -> PathBuf {
        dir.join(SETTINGS_FILE)
    }
}
