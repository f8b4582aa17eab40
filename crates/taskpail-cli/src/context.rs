//! Flags shared by the commands that address a run and its queue.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use taskpail_compiler::lower::{ENV_QUEUE_BUCKET, ENV_RUN_NAME, ENV_STEP};
use taskpail_core::RunContext;
use taskpail_queue::{
    LocalProvider, QueueClient, QueueConfig, QueueError, S3Options, S3Provider, StoreProvider,
};

/// Run queue endpoint handed to deployed components.
pub const ENV_RUN_QUEUE_ENDPOINT: &str = "TASKPAIL_QUEUE_ENDPOINT";
pub const ENV_RUN_QUEUE_ACCESS_KEY_ID: &str = "TASKPAIL_QUEUE_ACCESS_KEY_ID";
pub const ENV_RUN_QUEUE_SECRET_ACCESS_KEY: &str = "TASKPAIL_QUEUE_SECRET_ACCESS_KEY";

/// Identifies the run a command operates on.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Run name
    #[arg(long = "run", env = ENV_RUN_NAME)]
    pub run_name: String,

    /// Bucket holding the run's queue
    #[arg(long, env = ENV_QUEUE_BUCKET)]
    pub bucket: String,

    /// Pipeline step
    #[arg(long, env = ENV_STEP, default_value_t = 0)]
    pub step: u32,
}

impl RunArgs {
    pub fn context(&self) -> RunContext {
        RunContext::new(self.run_name.as_str(), self.bucket.as_str()).with_step(self.step)
    }
}

/// Where the run's queue lives.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Keep the queue in a local directory (one subdirectory per bucket)
    #[arg(long, env = "TASKPAIL_QUEUE_DIR")]
    pub queue_dir: Option<PathBuf>,

    /// S3-compatible endpoint of the run queue
    #[arg(long = "queue-endpoint", env = ENV_RUN_QUEUE_ENDPOINT)]
    pub endpoint: Option<String>,

    #[arg(long, env = ENV_RUN_QUEUE_ACCESS_KEY_ID, hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long, env = ENV_RUN_QUEUE_SECRET_ACCESS_KEY, hide_env_values = true)]
    pub secret_access_key: Option<String>,
}

impl StoreArgs {
    /// The provider selected by the flags. A local directory wins over an
    /// endpoint.
    pub fn provider(&self) -> Result<Arc<dyn StoreProvider>, QueueError> {
        if let Some(dir) = &self.queue_dir {
            return Ok(Arc::new(LocalProvider::new(dir)));
        }
        match &self.endpoint {
            Some(endpoint) => Ok(Arc::new(S3Provider::new(S3Options::new(
                endpoint,
                self.access_key_id.clone().unwrap_or_default(),
                self.secret_access_key.clone().unwrap_or_default(),
            )))),
            None => Err(QueueError::Config(
                "no queue configured: pass --queue-dir or --queue-endpoint".to_string(),
            )),
        }
    }

    /// A queue client with configuration taken from the environment.
    pub fn client(&self) -> Result<QueueClient, QueueError> {
        Ok(QueueClient::new(self.provider()?).with_config(QueueConfig::from_env()?))
    }
}

/// The remote store named by the copy-in variables.
pub fn origin_provider() -> Result<Arc<dyn StoreProvider>, QueueError> {
    Ok(Arc::new(S3Provider::new(S3Options::from_env()?)))
}

/// Where and how a run is deployed.
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Deployment target (kubernetes, print)
    #[arg(long, env = "TASKPAIL_TARGET", default_value = "kubernetes")]
    pub target: String,

    /// Namespace to deploy into
    #[arg(short, long, env = "TASKPAIL_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// kubectl context; the current context when empty
    #[arg(long, default_value = "")]
    pub context: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        store: StoreArgs,
    }

    #[test]
    fn test_run_args_context() {
        let cli = TestCli::parse_from(["t", "--run", "r1", "--bucket", "b", "--step", "2"]);
        let run = cli.run.context();
        assert_eq!(run.run_name.as_str(), "r1");
        assert_eq!(run.bucket, "b");
        assert_eq!(run.step, 2);
    }

    #[test]
    fn test_store_requires_a_location() {
        let cli = TestCli::parse_from(["t", "--run", "r", "--bucket", "b", "--queue-dir", "/tmp/q"]);
        assert!(cli.store.provider().is_ok());

        let store = StoreArgs {
            queue_dir: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
        };
        assert!(matches!(store.provider(), Err(QueueError::Config(_))));
    }
}
