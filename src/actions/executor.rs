//! ActionExecutor: runs a batch of model-requested actions against the
//! workspace.
//!
//! Actions run strictly in order, one at a time. A failing action gets an
//! `{"error": ...}` result and the batch carries on.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent_core::snapshot::TrackedFiles;
use crate::agent_core::tokens::{preview, truncate_to_budget};
use crate::host::HostEditor;
use crate::inference::AgentConfig;

use super::edit::{apply_edits, edit_report};
use super::errors::ActionError;
use super::shell::ShellRunner;
use super::types::{Action, ActionKind, ActionResult};
use super::web_search::{browse, SearchProvider, DEFAULT_NUM_RESULTS};

/// Longest result excerpt written to the log.
const LOG_PREVIEW_BYTES: usize = 100;

// ─── Action Payloads ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PathData {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WriteData {
    path: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(rename = "type")]
    search_type: Option<String>,
    pattern: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandData {
    command: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteData {
    language: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowseData {
    query: Option<String>,
    num_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EditData {
    path: Option<String>,
    #[serde(default)]
    edits: Value,
}

// ─── ActionExecutor ─────────────────────────────────────────────────────────

pub struct ActionExecutor {
    host: Arc<dyn HostEditor>,
    search: Arc<dyn SearchProvider>,
    tracked: Arc<TrackedFiles>,
    shell: ShellRunner,
    read_max_tokens: usize,
    search_max_results: usize,
}

impl ActionExecutor {
    pub fn new(
        host: Arc<dyn HostEditor>,
        search: Arc<dyn SearchProvider>,
        tracked: Arc<TrackedFiles>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            host,
            search,
            tracked,
            shell: ShellRunner::new(
                Duration::from_secs(config.command_timeout_secs),
                config.max_output_bytes,
            ),
            read_max_tokens: config.read_max_tokens,
            search_max_results: config.search_max_results,
        }
    }

    /// Run every action in order and attach its result.
    pub async fn execute_batch(&self, actions: Vec<Action>) -> Vec<Action> {
        tracing::info!(count = actions.len(), "executing actions");

        let mut executed = Vec::with_capacity(actions.len());
        for (index, mut action) in actions.into_iter().enumerate() {
            tracing::info!(
                index,
                action = %action.action_type,
                data = %preview(&action.data.to_string(), LOG_PREVIEW_BYTES),
                "executing action"
            );

            let result = match self.execute(&action).await {
                Ok(value) => ActionResult::Success(value),
                Err(e) => {
                    tracing::warn!(index, action = %action.action_type, error = %e, "action failed");
                    ActionResult::Failure {
                        error: e.to_string(),
                    }
                }
            };

            let rendered = match &result {
                ActionResult::Success(Value::String(s)) => s.clone(),
                ActionResult::Success(v) => v.to_string(),
                ActionResult::Failure { error } => error.clone(),
            };
            tracing::info!(
                index,
                action = %action.action_type,
                result = %preview(&rendered, LOG_PREVIEW_BYTES),
                "action result"
            );

            action.result = Some(result);
            executed.push(action);
        }
        executed
    }

    /// Run a single action.
    pub async fn execute(&self, action: &Action) -> Result<Value, ActionError> {
        let Some(kind) = action.kind() else {
            return Err(ActionError::UnknownAction {
                action_type: action.action_type.clone(),
            });
        };

        match kind {
            ActionKind::Read => {
                let data: PathData = payload(action, kind)?;
                let path = require(data.path, kind, "path")?;
                self.read(&path).await
            }
            ActionKind::Write => {
                let data: WriteData = payload(action, kind)?;
                let path = require(data.path, kind, "path")?;
                let content = require(data.content, kind, "content")?;
                self.write(&path, &content).await
            }
            ActionKind::Search => {
                let data: SearchData = payload(action, kind)?;
                self.search(data).await
            }
            ActionKind::Command => {
                let data: CommandData = payload(action, kind)?;
                let command = require(data.command, kind, "command")?;
                let root = self.host.workspace_root();
                let out = self.shell.run_command(&command, root.as_deref()).await?;
                Ok(Value::String(out))
            }
            ActionKind::Execute => {
                let data: ExecuteData = payload(action, kind)?;
                let language = require(data.language, kind, "language")?;
                let code = require(data.code, kind, "code")?;
                let root = self.host.workspace_root();
                let out = self
                    .shell
                    .execute_code(&language, &code, root.as_deref())
                    .await?;
                Ok(Value::String(out))
            }
            ActionKind::Analyze => Ok(action.data.clone()),
            ActionKind::Browse => {
                let data: BrowseData = payload(action, kind)?;
                let query = require(data.query, kind, "query")?;
                let n = data.num_results.unwrap_or(DEFAULT_NUM_RESULTS);
                Ok(browse(self.search.as_ref(), &query, n).await)
            }
            ActionKind::Edit => {
                let data: EditData = payload(action, kind)?;
                let path = require(data.path, kind, "path")?;
                self.edit(&path, &data.edits).await
            }
            ActionKind::Stop => Ok(json!({ "stopped": true })),
        }
    }

    // ─── Handlers ───────────────────────────────────────────────────────

    async fn read(&self, path: &str) -> Result<Value, ActionError> {
        let resolved = self.host.resolve_path(path);
        let content = self.host.read_text(&resolved).await?;
        Ok(Value::String(truncate_to_budget(
            &content,
            self.read_max_tokens,
        )))
    }

    async fn write(&self, path: &str, content: &str) -> Result<Value, ActionError> {
        let resolved = self.host.resolve_path(path);
        self.host.write_text(&resolved, content).await?;
        self.tracked.insert(resolved.display().to_string());
        tracing::info!(path = %resolved.display(), bytes = content.len(), "file written");
        Ok(json!({ "success": true }))
    }

    async fn search(&self, data: SearchData) -> Result<Value, ActionError> {
        let limit = self.search_max_results;
        match data.search_type.as_deref() {
            Some("files") => {
                let pattern = require(data.pattern, ActionKind::Search, "pattern")?;
                let paths = self.host.find_files(&pattern, limit).await?;
                Ok(json!(paths))
            }
            Some("text") => {
                let text = require(data.text, ActionKind::Search, "text")?;
                let matches = self.host.find_text_matches(&text, limit).await?;
                Ok(json!(matches))
            }
            Some(other) => Err(ActionError::InvalidData {
                action: "search",
                reason: format!("unknown search type '{other}', expected 'files' or 'text'"),
            }),
            None => Err(ActionError::MissingField {
                action: "search",
                field: "type",
            }),
        }
    }

    async fn edit(&self, path: &str, edits: &Value) -> Result<Value, ActionError> {
        let resolved = self.host.resolve_path(path);
        if !exists(&resolved).await {
            tracing::info!(path = %resolved.display(), "edit target missing, creating it");
            self.host.write_text(&resolved, "").await?;
        }

        let before = self.host.read_text(&resolved).await?;
        let outcome = apply_edits(&before, edits)?;
        if outcome.content != before {
            self.host.write_text(&resolved, &outcome.content).await?;
        }
        self.tracked.insert(resolved.display().to_string());

        Ok(edit_report(path, &before, &outcome))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Decode an action's `data`. A missing payload decodes as `{}`.
fn payload<T: DeserializeOwned>(action: &Action, kind: ActionKind) -> Result<T, ActionError> {
    let data = if action.data.is_null() {
        json!({})
    } else {
        action.data.clone()
    };
    serde_json::from_value(data).map_err(|e| ActionError::InvalidData {
        action: kind.as_str(),
        reason: e.to_string(),
    })
}

fn require<T>(value: Option<T>, kind: ActionKind, field: &'static str) -> Result<T, ActionError> {
    value.ok_or(ActionError::MissingField {
        action: kind.as_str(),
        field,
    })
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
