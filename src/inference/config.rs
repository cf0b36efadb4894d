//! Assistant configuration loading.
//!
//! Reads a YAML file and resolves environment variables. The file is
//! optional: every field has a default, except the API key which must come
//! from the file or the environment.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::errors::InferenceError;

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "WORKSPACE_ASSISTANT_CONFIG";

/// Env var read when `completion.api_key` is empty.
pub const API_KEY_ENV_VAR: &str = "WORKSPACE_ASSISTANT_API_KEY";

/// Project-local config location, searched upward from the workspace root.
const PROJECT_CONFIG: &str = ".assistant/config.yaml";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Remote completion endpoint and sampling parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub request_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.fireworks.ai/inference/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "accounts/fireworks/models/deepseek-v3-0324".to_string(),
            max_tokens: 20_480,
            temperature: 0.6,
            top_p: 1.0,
            top_k: 40,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            request_timeout_secs: 300,
        }
    }
}

/// Action loop and action executor limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum model calls per user message.
    pub max_turns: u32,
    /// Token budget applied to `read` results (4 chars per token).
    pub read_max_tokens: usize,
    /// Wall-clock limit for `command` and `execute`.
    pub command_timeout_secs: u64,
    /// Stdout cap for `command` and `execute`.
    pub max_output_bytes: usize,
    /// Cap on `search` result entries.
    pub search_max_results: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 25,
            read_max_tokens: 120_000,
            command_timeout_secs: 120,
            max_output_bytes: 5 * 1024 * 1024,
            search_max_results: 500,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub completion: CompletionConfig,
    pub agent: AgentConfig,
    /// Workspace root. The CLI flag wins; falls back to the cwd.
    pub workspace_root: Option<PathBuf>,
}

impl AssistantConfig {
    /// Resolve the effective configuration.
    ///
    /// Order: `explicit` path, `$WORKSPACE_ASSISTANT_CONFIG`, project config
    /// found upward from `start`, `<data_dir>/config.yaml`, built-in defaults.
    pub fn resolve(
        explicit: Option<&Path>,
        start: &Path,
        data_dir: &Path,
    ) -> Result<Self, InferenceError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => find_config_path(start, data_dir),
        };

        let mut config = match path {
            Some(ref p) => {
                tracing::info!(path = %p.display(), "loading assistant config");
                load_config(p)?
            }
            None => {
                tracing::info!("no config file found, using defaults");
                AssistantConfig::default()
            }
        };

        config.apply_env_fallbacks();
        Ok(config)
    }

    /// Fill the API key from the environment when the file left it empty.
    fn apply_env_fallbacks(&mut self) {
        if self.completion.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV_VAR) {
                self.completion.api_key = key.trim().to_string();
            }
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate a config file without reading it.
pub fn find_config_path(start: &Path, data_dir: &Path) -> Option<PathBuf> {
    // 1. Env var
    if let Ok(p) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&p));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points to a missing file");
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(PROJECT_CONFIG);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    // 3. Per-user config
    let candidate = data_dir.join("config.yaml");
    candidate.exists().then_some(candidate)
}

/// Load and parse a configuration file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<AssistantConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

fn parse_config(raw: &str) -> Result<AssistantConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(AssistantConfig::default());
    }
    serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to parse config: {e}"),
    })
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Empty values count as unset.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
