//! `queue` subcommands: feed and inspect a run's queue.

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::{Args, Subcommand};
use taskpail_core::hlir::sweep_values;
use taskpail_core::{RunContext, TaskOutcome};
use taskpail_queue::{EnqueueOptions, QueueClient, StoreProvider};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::{origin_provider, RunArgs, StoreArgs};

#[derive(Subcommand)]
pub enum QueueCommand {
    /// Enqueue local files as tasks
    Add(AddArgs),

    /// Enqueue every object under a remote bucket path
    #[command(name = "add-s3")]
    AddS3(AddS3Args),

    /// Enqueue literal values, one task each
    #[command(name = "add-values")]
    AddValues(AddValuesArgs),

    /// Enqueue one task per value of a numeric range
    Sweep(SweepArgs),

    /// List keys under a queue path
    Ls(LsArgs),

    /// Download one remote object to a local file
    Download(DownloadArgs),
}

#[derive(Args)]
pub struct QueueArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub store: StoreArgs,
}

impl QueueArgs {
    fn open(&self) -> Result<(QueueClient, RunContext), Box<dyn Error>> {
        Ok((self.store.client()?, self.run.context()))
    }
}

#[derive(Args)]
pub struct AddArgs {
    /// Files to enqueue
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Task name to use instead of the file name (single file only)
    #[arg(long)]
    pub alias: Option<String>,

    /// Wait for the tasks to finish; fails if any task failed
    #[arg(long)]
    pub wait: bool,

    #[command(flatten)]
    pub queue: QueueArgs,
}

#[derive(Args)]
pub struct AddS3Args {
    /// Source as bucket/path
    pub path: String,

    /// Enqueue each object this many times
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    #[command(flatten)]
    pub queue: QueueArgs,
}

#[derive(Args)]
pub struct AddValuesArgs {
    /// Task bodies
    #[arg(required = true)]
    pub values: Vec<String>,

    #[command(flatten)]
    pub queue: QueueArgs,
}

#[derive(Args)]
pub struct SweepArgs {
    #[arg(allow_negative_numbers = true)]
    pub min: i64,

    #[arg(allow_negative_numbers = true)]
    pub max: i64,

    #[arg(long, default_value_t = 1)]
    pub step: i64,

    /// Seconds between enqueues
    #[arg(long, default_value_t = 0)]
    pub interval: u64,

    /// Wait for each task to finish before enqueueing the next
    #[arg(long)]
    pub wait: bool,

    #[command(flatten)]
    pub queue: QueueArgs,
}

#[derive(Args)]
pub struct LsArgs {
    /// Path under the run root, e.g. `inbox/pool1`
    #[arg(default_value = "")]
    pub path: String,

    #[command(flatten)]
    pub queue: QueueArgs,
}

#[derive(Args)]
pub struct DownloadArgs {
    /// Source as bucket/key
    pub path: String,

    /// Local destination file
    pub dest: PathBuf,
}

pub async fn run(cmd: QueueCommand) -> Result<(), Box<dyn Error>> {
    let cancel = shutdown_token();
    match cmd {
        QueueCommand::Add(args) => add(args, &cancel).await,
        QueueCommand::AddS3(args) => {
            let (client, run) = args.queue.open()?;
            let origin = origin_provider()?;
            let n = client
                .enqueue_from_remote(&run, origin.as_ref(), &args.path, args.repeat, &cancel)
                .await?;
            info!(run = %run.run_name, source = %args.path, tasks = n, "enqueued remote objects");
            Ok(())
        }
        QueueCommand::AddValues(args) => {
            let (client, run) = args.queue.open()?;
            client.enqueue_values(&run, &args.values).await?;
            Ok(())
        }
        QueueCommand::Sweep(args) => sweep(args, &cancel).await,
        QueueCommand::Ls(args) => {
            let (client, run) = args.queue.open()?;
            let mut keys = client.list(&run, &args.path);
            while let Some(key) = keys.next().await {
                println!("{}", key?);
            }
            Ok(())
        }
        QueueCommand::Download(args) => {
            let (bucket, key) = args
                .path
                .split_once('/')
                .ok_or_else(|| format!("expected bucket/key, got '{}'", args.path))?;
            let client = QueueClient::new(origin_provider()?);
            client.download(bucket, key, &args.dest).await?;
            Ok(())
        }
    }
}

async fn add(args: AddArgs, cancel: &CancellationToken) -> Result<(), Box<dyn Error>> {
    let (client, run) = args.queue.open()?;

    let outcomes = if args.files.len() == 1 {
        let opts = EnqueueOptions {
            alias: args.alias.clone(),
            wait: args.wait,
        };
        vec![client.enqueue(&run, &args.files[0], &opts, cancel).await?]
    } else {
        if args.alias.is_some() {
            return Err("--alias needs exactly one file".into());
        }
        let opts = EnqueueOptions {
            alias: None,
            wait: args.wait,
        };
        client.enqueue_many(&run, &args.files, &opts, cancel).await?
    };

    check_outcomes(&outcomes)
}

/// Fail when any awaited task failed.
fn check_outcomes(outcomes: &[Option<TaskOutcome>]) -> Result<(), Box<dyn Error>> {
    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, Some(TaskOutcome::Failure)))
        .count();
    if failed > 0 {
        return Err(format!("{} task(s) failed", failed).into());
    }
    Ok(())
}

async fn sweep(args: SweepArgs, cancel: &CancellationToken) -> Result<(), Box<dyn Error>> {
    let (client, run) = args.queue.open()?;
    let values = sweep_values(args.min, args.max, args.step);

    if args.interval == 0 && !args.wait {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        client.enqueue_values(&run, &values).await?;
        return Ok(());
    }

    client.provider().ensure_bucket(&run.bucket).await?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 && args.interval > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return Err("cancelled".into()),
                _ = tokio::time::sleep(Duration::from_secs(args.interval)) => {}
            }
        }

        let task = format!("task.{}.txt", i);
        client
            .enqueue_bytes(&run, &task, Bytes::from(value.to_string()))
            .await?;
        if args.wait {
            let outcome = client.wait_for_outcome(&run, &task, cancel).await?;
            check_outcomes(&[Some(outcome)])?;
        }
    }
    Ok(())
}

/// A token cancelled on Ctrl-C.
pub fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            token.cancel();
        }
    });
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_outcomes() {
        assert!(check_outcomes(&[None, Some(TaskOutcome::Success)]).is_ok());
        assert!(check_outcomes(&[Some(TaskOutcome::Failure)]).is_err());
    }

    #[tokio::test]
    async fn test_sweep_with_wait_over_local_queue() {
        let dir = std::env::temp_dir().join(format!("taskpail-sweep-{}", std::process::id()));
        let args = SweepArgs {
            min: 1,
            max: 3,
            step: 1,
            interval: 0,
            wait: false,
            queue: QueueArgs {
                run: RunArgs {
                    run_name: "r".to_string(),
                    bucket: "b".to_string(),
                    step: 0,
                },
                store: StoreArgs {
                    queue_dir: Some(dir.clone()),
                    endpoint: None,
                    access_key_id: None,
                    secret_access_key: None,
                },
            },
        };
        let (client, run) = args.queue.open().unwrap();
        sweep(args, &CancellationToken::new()).await.unwrap();

        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.unassigned, 3);
        let _ = std::fs::remove_dir_all(dir);
    }
}
