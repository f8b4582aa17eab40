//! Pool worker runtime: claims tasks from a pool's inbox and runs the
//! application's handler command on each.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use taskpail_core::{QueuePrefix, RunContext, TaskOutcome};
use taskpail_queue::{LeaseTracker, QueueClient, QueueError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the task being processed, visible to the handler.
pub const ENV_TASK: &str = "TASKPAIL_TASK";

/// Processes the tasks of one pool.
pub struct TaskRunner {
    client: QueueClient,
    run: RunContext,
    pool: String,
    command: String,
    workdir: PathBuf,
    leases: Mutex<LeaseTracker>,
}

impl TaskRunner {
    pub fn new(
        client: QueueClient,
        run: RunContext,
        pool: impl Into<String>,
        command: impl Into<String>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        let leases = Mutex::new(LeaseTracker::new(client.config().claim_lease));
        Self {
            leases,
            client,
            run,
            pool: pool.into(),
            command: command.into(),
            workdir: workdir.into(),
        }
    }

    /// Process inbox tasks until cancelled. With `drain`, return once the
    /// unassigned queue is empty and the pool holds no task in its inbox or
    /// in processing.
    pub async fn run(&self, drain: bool, cancel: CancellationToken) -> Result<usize, QueueError> {
        info!(run = %self.run.run_name, pool = %self.pool, "worker started");
        let mut total = 0;
        loop {
            self.release_expired().await?;
            let processed = self.process_inbox(&cancel).await?;
            total += processed;

            if processed == 0 && drain {
                let stats = self.client.stats(&self.run).await?;
                let pool = stats.pool(&self.pool);
                if stats.unassigned == 0 && pool.backlog() == 0 {
                    break;
                }
                debug!(
                    unassigned = stats.unassigned,
                    inbox = pool.inbox,
                    processing = pool.processing,
                    "waiting for outstanding tasks"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.client.config().completion_poll_interval) => {}
            }
        }
        info!(run = %self.run.run_name, pool = %self.pool, processed = total, "worker stopped");
        Ok(total)
    }

    /// Put this pool's claims held past the lease back into its inbox, so a
    /// sibling that died mid-task does not strand its task.
    async fn release_expired(&self) -> Result<usize, QueueError> {
        let held = self
            .client
            .held_tasks(&self.run, QueuePrefix::Processing, Some(self.pool.as_str()))
            .await?;
        let expired = self
            .leases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .expired(held);

        let mut released = 0;
        for task in expired {
            if self.client.release(&self.run, &self.pool, &task.task).await? {
                warn!(task = %task.task, pool = %self.pool, "released claim held past its lease");
                released += 1;
            }
        }
        Ok(released)
    }

    /// One pass over the inbox. Returns the number of tasks this worker
    /// finished; tasks claimed by a sibling are skipped.
    pub async fn process_inbox(&self, cancel: &CancellationToken) -> Result<usize, QueueError> {
        let tasks = self
            .client
            .tasks(&self.run, QueuePrefix::Inbox, Some(self.pool.as_str()))
            .await?;

        let mut processed = 0;
        for task in tasks {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if !self.client.claim(&self.run, &self.pool, &task).await? {
                debug!(task = %task, "task claimed by another worker");
                continue;
            }

            let outcome = self.process(&task).await;
            self.client.finish(&self.run, &self.pool, &task, outcome).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Run the handler on a claimed task. Any failure to stage or run the
    /// task counts as a task failure.
    async fn process(&self, task: &str) -> TaskOutcome {
        let key = self.run.processing_key(&self.pool, task);
        let input = self.workdir.join(task);

        let staged = async {
            let body = self.client.fetch(&self.run, &key).await?;
            tokio::fs::create_dir_all(&self.workdir).await?;
            tokio::fs::write(&input, &body).await?;
            Ok::<(), QueueError>(())
        }
        .await;

        let outcome = match staged {
            Ok(()) => self.execute(task, &input).await,
            Err(e) => {
                error!(task = %task, error = %e, "failed to stage task");
                TaskOutcome::Failure
            }
        };

        if let Err(e) = tokio::fs::remove_file(&input).await {
            debug!(task = %task, error = %e, "failed to remove task input");
        }
        outcome
    }

    async fn execute(&self, task: &str, input: &Path) -> TaskOutcome {
        // The handler gets the input file as its first argument.
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(format!("{} \"$1\"", self.command))
            .arg("taskpail")
            .arg(input)
            .env(ENV_TASK, task)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(task = %task, error = %e, "failed to spawn handler");
                return TaskOutcome::Failure;
            }
        };

        if let Some(stderr) = child.stderr.take() {
            let task = task.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(task = %task, stderr = %line, "handler stderr");
                }
            });
        }
        if let Some(stdout) = child.stdout.take() {
            let task = task.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(task = %task, stdout = %line, "handler output");
                }
            });
        }

        match child.wait().await {
            Ok(status) if status.success() => {
                info!(task = %task, "task succeeded");
                TaskOutcome::Success
            }
            Ok(status) => {
                warn!(task = %task, exit_code = status.code().unwrap_or(-1), "task failed");
                TaskOutcome::Failure
            }
            Err(e) => {
                error!(task = %task, error = %e, "failed to wait for handler");
                TaskOutcome::Failure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;
    use taskpail_queue::{MemoryProvider, QueueConfig, StoreProvider};

    async fn setup(command: &str, dir: &str) -> (QueueClient, RunContext, TaskRunner) {
        setup_with_lease(command, dir, QueueConfig::default().claim_lease).await
    }

    async fn setup_with_lease(
        command: &str,
        dir: &str,
        claim_lease: Duration,
    ) -> (QueueClient, RunContext, TaskRunner) {
        let provider = Arc::new(MemoryProvider::new());
        provider.ensure_bucket("q").await.unwrap();
        let client = QueueClient::new(provider).with_config(QueueConfig {
            completion_poll_interval: Duration::from_millis(10),
            claim_lease,
            ..Default::default()
        });
        let run = RunContext::new("r", "q");
        let workdir = std::env::temp_dir().join(format!("taskpail-worker-{}-{}", dir, std::process::id()));
        let runner = TaskRunner::new(client.clone(), run.clone(), "p", command, workdir);
        (client, run, runner)
    }

    async fn assign(client: &QueueClient, run: &RunContext, task: &str, body: &str) {
        client
            .enqueue_bytes(run, task, Bytes::from(body.to_string()))
            .await
            .unwrap();
        assert!(client.assign(run, task, "p").await.unwrap());
    }

    #[tokio::test]
    async fn test_successful_handler() {
        // succeeds only when the input file holds the task body
        let (client, run, runner) = setup("grep -q hello", "ok").await;
        assign(&client, &run, "t1", "hello world").await;

        let processed = runner.process_inbox(&CancellationToken::new()).await.unwrap();
        assert_eq!(processed, 1);

        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.pool("p").success, 1);
        assert_eq!(stats.pool("p").inbox, 0);
        assert_eq!(stats.pool("p").processing, 0);
    }

    #[tokio::test]
    async fn test_failing_handler() {
        let (client, run, runner) = setup("exit 3; true", "fail").await;
        assign(&client, &run, "t1", "x").await;

        runner.process_inbox(&CancellationToken::new()).await.unwrap();
        assert_eq!(client.stats(&run).await.unwrap().pool("p").failure, 1);
    }

    #[tokio::test]
    async fn test_drain_returns_when_empty() {
        let (client, run, runner) = setup("true", "drain").await;
        assign(&client, &run, "a", "1").await;
        assign(&client, &run, "b", "2").await;

        let total = runner.run(true, CancellationToken::new()).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(client.stats(&run).await.unwrap().pool("p").success, 2);
    }

    #[tokio::test]
    async fn test_drain_recovers_abandoned_claim() {
        let (client, run, runner) = setup_with_lease("true", "abandoned", Duration::from_millis(20)).await;
        // claimed by a sibling that died before finishing
        assign(&client, &run, "orphan", "x").await;
        assert!(client.claim(&run, "p", "orphan").await.unwrap());

        let total = tokio::time::timeout(Duration::from_secs(5), runner.run(true, CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(total, 1);

        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.pool("p").success, 1);
        assert_eq!(stats.pool("p").processing, 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_processing() {
        let (client, run, runner) = setup("true", "inflight").await;
        assign(&client, &run, "slow", "x").await;
        assert!(client.claim(&run, "p", "slow").await.unwrap());

        // a sibling finishes its task a little later
        let sibling = {
            let client = client.clone();
            let run = run.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                client.finish(&run, "p", "slow", TaskOutcome::Success).await.unwrap();
            })
        };

        let started = std::time::Instant::now();
        let total = runner.run(true, CancellationToken::new()).await.unwrap();
        assert_eq!(total, 0);
        assert!(started.elapsed() >= Duration::from_millis(50));
        sibling.await.unwrap();
        assert_eq!(client.stats(&run).await.unwrap().pool("p").success, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_claim() {
        let (client, run, runner) = setup("true", "cancel").await;
        assign(&client, &run, "a", "1").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            runner.process_inbox(&cancel).await,
            Err(QueueError::Cancelled)
        ));
        assert_eq!(client.stats(&run).await.unwrap().pool("p").inbox, 1);
    }
}
