use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use taskpail_compiler::lower::ENV_POOL;
use tracing::info;

use crate::backend::manifest::ENV_TASK_COMMAND;
use crate::commands::queue::shutdown_token;
use crate::context::{RunArgs, StoreArgs};
use crate::worker::TaskRunner;

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// Process the tasks assigned to one pool
    Run(WorkerRunArgs),
}

#[derive(Args)]
pub struct WorkerRunArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Pool to take tasks from
    #[arg(long, env = ENV_POOL)]
    pub pool: String,

    /// Handler command; receives the task file path as its argument
    #[arg(long, env = ENV_TASK_COMMAND)]
    pub command: String,

    /// Directory task files are fetched into
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Exit once no work is left instead of waiting for more
    #[arg(long)]
    pub drain: bool,
}

pub async fn run(cmd: WorkerCommand) -> Result<(), Box<dyn Error>> {
    match cmd {
        WorkerCommand::Run(args) => {
            let workdir = args
                .workdir
                .unwrap_or_else(|| std::env::temp_dir().join("taskpail").join(&args.pool));
            tokio::fs::create_dir_all(&workdir).await?;

            let runner = TaskRunner::new(
                args.store.client()?,
                args.run.context(),
                args.pool,
                args.command,
                workdir,
            );
            let processed = runner.run(args.drain, shutdown_token()).await?;
            info!(processed, "worker exiting");
            Ok(())
        }
    }
}
