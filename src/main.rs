use std::path::PathBuf;

use clap::Parser;

use workspace_assistant::RunOptions;

/// Side-panel chat agent. Speaks the panel protocol as JSON lines on
/// stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "workspace-assistant", version, about)]
struct Cli {
    /// Workspace root the agent acts on (default: current directory)
    #[arg(long, env = "WORKSPACE_ASSISTANT_ROOT")]
    workspace: Option<PathBuf>,

    /// Config file (default: discovered from the workspace or data dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for logs, the chat database and panel settings
    #[arg(long, env = "WORKSPACE_ASSISTANT_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    workspace_assistant::run(RunOptions {
        workspace: cli.workspace,
        config: cli.config,
        data_dir: cli.data_dir,
    })
    .await
}
