pub mod actions;
pub mod agent_core;
pub mod host;
pub mod inference;
pub mod panel;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use actions::web_search::DUCKDUCKGO_BASE_URL;
use actions::DuckDuckGoSearch;
use agent_core::{AgentDatabase, ChatStore};
use host::LocalWorkspace;
use inference::{AssistantConfig, CompletionClient};
use panel::stdio::{serve, write_events};
use panel::{AssistantSession, ChannelSink};

/// Startup options, usually filled from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Workspace root. Overrides the config file; falls back to the cwd.
    pub workspace: Option<PathBuf>,
    /// Explicit config file.
    pub config: Option<PathBuf>,
    /// Where logs, the database and panel settings live.
    pub data_dir: Option<PathBuf>,
}

/// Return the platform-standard data directory for the assistant.
///
/// - macOS: `~/Library/Application Support/workspace-assistant/`
/// - Windows: `{FOLDERID_RoamingAppData}\workspace-assistant\`
/// - Linux: `$XDG_DATA_HOME/workspace-assistant/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.workspace-assistant/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("workspace-assistant");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".workspace-assistant")
}

/// Initialize the tracing subscriber, writing to `<dir>/assistant.log`.
///
/// Stdout carries the panel protocol, so nothing is ever logged there.
/// On each startup:
/// 1. Rotates existing logs (assistant.log → .1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh assistant.log with a line-flushing writer.
/// 3. Logs a startup banner with the data directory path.
fn init_tracing(dir: &Path) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_path = dir.join("assistant.log");
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("workspace_assistant=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== Workspace Assistant starting ==="
    );
    Ok(())
}

/// Rotate log files: `assistant.log` → `assistant.log.1` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that flushes the log file after every write, so entries
/// survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run the stdio panel server until stdin closes.
pub async fn run(options: RunOptions) -> anyhow::Result<()> {
    let data_dir = options.data_dir.unwrap_or_else(data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    // Initialize tracing FIRST, before any tracing::info!() calls
    init_tracing(&data_dir)?;

    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let start = options.workspace.clone().unwrap_or_else(|| cwd.clone());
    let config = AssistantConfig::resolve(options.config.as_deref(), &start, &data_dir)
        .context("failed to load configuration")?;

    let workspace_root = options
        .workspace
        .or_else(|| config.workspace_root.clone())
        .unwrap_or(cwd);
    if config.completion.api_key.trim().is_empty() {
        tracing::warn!("no API key configured, completion requests will fail");
    }

    let db_path = data_dir.join("assistant.db");
    let db = AgentDatabase::open(&db_path.to_string_lossy())
        .context("failed to open assistant database")?;
    let store = ChatStore::open(db).context("failed to load chats")?;
    tracing::info!(db_path = %db_path.display(), "assistant database initialized");

    let completion = CompletionClient::new(config.completion.clone())
        .context("failed to build completion client")?;
    let search = DuckDuckGoSearch::new(DUCKDUCKGO_BASE_URL)
        .context("failed to build web search provider")?;

    tracing::info!(
        workspace = %workspace_root.display(),
        model = completion.model(),
        max_turns = config.agent.max_turns,
        "session configured"
    );

    let (sink, events) = ChannelSink::new();
    let writer = tokio::spawn(write_events(events, tokio::io::stdout()));

    let session = AssistantSession::new(
        store,
        Arc::new(LocalWorkspace::new(Some(workspace_root))),
        Arc::new(completion),
        Arc::new(search),
        Arc::new(sink),
        &config.agent,
        data_dir,
    );
    session.startup();

    let served = serve(session.clone(), tokio::io::stdin()).await;

    // Last session handle: dropping it closes the outbound channel
    drop(session);
    writer.await.context("panel writer panicked")??;
    served?;

    tracing::info!("=== Workspace Assistant stopped ===");
    Ok(())
}
