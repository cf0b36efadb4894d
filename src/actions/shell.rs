//! `command` and `execute` actions.
//!
//! Both spawn a child process in the workspace root, wait up to a deadline,
//! and return stdout. Stderr is logged; a non-zero exit turns it into the
//! error text. The child is killed when the deadline passes or either
//! pipe outgrows the cap.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use super::errors::ActionError;

/// Directory (under the workspace root) holding `execute` temp files.
pub const TEMP_DIR_NAME: &str = ".ai-assistant-temp";

// ─── Languages ──────────────────────────────────────────────────────────────

/// Source file extension for an `execute` language name.
pub fn extension_for(language: &str) -> Option<&'static str> {
    match language.to_lowercase().as_str() {
        "js" | "javascript" => Some(".js"),
        "ts" | "typescript" => Some(".ts"),
        "py" | "python" => Some(".py"),
        "bash" | "sh" => Some(".sh"),
        "rb" | "ruby" => Some(".rb"),
        "ps1" | "powershell" => Some(".ps1"),
        _ => None,
    }
}

/// Program and leading arguments that run a source file of `language`.
fn runner_for(language: &str) -> Option<(&'static str, &'static [&'static str])> {
    let python = if cfg!(windows) { "python" } else { "python3" };
    let runner: (&'static str, &'static [&'static str]) = match language.to_lowercase().as_str() {
        "js" | "javascript" => ("node", &[]),
        "ts" | "typescript" => ("npx", &["ts-node"]),
        "py" | "python" => (python, &[]),
        "bash" | "sh" => ("bash", &[]),
        "rb" | "ruby" => ("ruby", &[]),
        "ps1" | "powershell" => ("pwsh", &["-File"]),
        _ => return None,
    };
    Some(runner)
}

// ─── ShellRunner ────────────────────────────────────────────────────────────

/// Spawns `command` and `execute` processes with shared limits.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
    max_output_bytes: usize,
}

impl ShellRunner {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }

    /// Run `command` through the platform shell.
    pub async fn run_command(&self, command: &str, cwd: Option<&Path>) -> Result<String, ActionError> {
        tracing::info!(command, "running command");

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        self.run(cmd).await.map_err(|e| match e {
            SpawnOutcome::NotFound(source) | SpawnOutcome::Io(source) => ActionError::Io {
                op: "spawn shell",
                path: command.to_string(),
                source,
            },
            SpawnOutcome::Failed(err) => err,
        })
    }

    /// Write `code` to a temp file and run it with the language's runner.
    /// The temp file is removed afterwards whatever the outcome.
    pub async fn execute_code(
        &self,
        language: &str,
        code: &str,
        root: Option<&Path>,
    ) -> Result<String, ActionError> {
        let extension = extension_for(language).ok_or_else(|| ActionError::UnsupportedLanguage {
            language: language.to_string(),
        })?;
        let (program, args) = runner_for(language).ok_or_else(|| {
            ActionError::UnsupportedLanguage {
                language: language.to_string(),
            }
        })?;

        let temp_dir = root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir)
            .join(TEMP_DIR_NAME);
        tokio::fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| ActionError::Io {
                op: "create directory",
                path: temp_dir.display().to_string(),
                source: e,
            })?;

        let temp_file = temp_file_path(&temp_dir, extension);
        tokio::fs::write(&temp_file, code)
            .await
            .map_err(|e| ActionError::Io {
                op: "write",
                path: temp_file.display().to_string(),
                source: e,
            })?;

        tracing::info!(language, file = %temp_file.display(), "executing code");

        let mut cmd = Command::new(program);
        cmd.args(args).arg(&temp_file);
        if let Some(dir) = root {
            cmd.current_dir(dir);
        }

        let result = self.run(cmd).await;

        if let Err(e) = tokio::fs::remove_file(&temp_file).await {
            tracing::debug!(file = %temp_file.display(), error = %e, "temp file cleanup failed");
        }

        result.map_err(|e| match e {
            SpawnOutcome::NotFound(_) => ActionError::ExecutionNotSupported {
                language: language.to_string(),
                reason: format!("`{program}` is not installed"),
            },
            SpawnOutcome::Io(source) => ActionError::Io {
                op: "spawn",
                path: program.to_string(),
                source,
            },
            SpawnOutcome::Failed(err) => err,
        })
    }

    /// Spawn, collect output under the cap, and enforce the deadline.
    async fn run(&self, mut cmd: Command) -> Result<String, SpawnOutcome> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpawnOutcome::NotFound(e)
            } else {
                SpawnOutcome::Io(e)
            }
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            SpawnOutcome::Io(std::io::Error::other("child stdout not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            SpawnOutcome::Io(std::io::Error::other("child stderr not captured"))
        })?;

        let limit = self.max_output_bytes as u64;
        let collected = tokio::time::timeout(
            self.timeout,
            collect_output(&mut child, stdout, stderr, limit),
        )
        .await
        .map_err(|_| {
            SpawnOutcome::Failed(ActionError::Timeout {
                secs: self.timeout.as_secs(),
            })
        })?
        .map_err(SpawnOutcome::Io)?;

        let Some((status, out, err)) = collected else {
            return Err(SpawnOutcome::Failed(ActionError::OutputTooLarge {
                limit: self.max_output_bytes,
            }));
        };

        finish(status, &out, &err).map_err(SpawnOutcome::Failed)
    }
}

/// Why a process run failed before producing a result.
enum SpawnOutcome {
    NotFound(std::io::Error),
    Io(std::io::Error),
    Failed(ActionError),
}

/// Read both pipes to EOF and wait for exit. `None` when either pipe
/// passed `limit` bytes; the child is killed right away in that case.
async fn collect_output(
    child: &mut Child,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
    limit: u64,
) -> std::io::Result<Option<(ExitStatus, Vec<u8>, Vec<u8>)>> {
    let out_fut = read_capped(&mut stdout, limit);
    let err_fut = read_capped(&mut stderr, limit);
    tokio::pin!(out_fut, err_fut);

    let mut out = None;
    let mut err = None;
    while out.is_none() || err.is_none() {
        let (pipe, bytes) = tokio::select! {
            r = &mut out_fut, if out.is_none() => ("stdout", r?),
            r = &mut err_fut, if err.is_none() => ("stderr", r?),
        };
        if bytes.len() as u64 > limit {
            tracing::warn!(pipe, limit, "process output over the cap, killing");
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "kill after output overflow failed");
            }
            return Ok(None);
        }
        if pipe == "stdout" {
            out = Some(bytes);
        } else {
            err = Some(bytes);
        }
    }

    let status = child.wait().await?;
    Ok(Some((
        status,
        out.unwrap_or_default(),
        err.unwrap_or_default(),
    )))
}

/// Read up to `limit + 1` bytes, stopping early so an oversized stream is
/// detected without draining it.
async fn read_capped<R>(reader: &mut R, limit: u64) -> std::io::Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.take(limit + 1).read_to_end(&mut buf).await?;
    Ok(buf)
}

fn finish(status: ExitStatus, out: &[u8], err: &[u8]) -> Result<String, ActionError> {
    let stderr = String::from_utf8_lossy(err);
    if !stderr.trim().is_empty() {
        tracing::info!(stderr = %stderr.trim_end(), "command stderr");
    }

    if !status.success() {
        return Err(ActionError::CommandFailed {
            code: status.code(),
            stderr: stderr.trim_end().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(out).into_owned())
}

fn temp_file_path(dir: &Path, extension: &str) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    dir.join(format!("code_{millis}{extension}"))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
