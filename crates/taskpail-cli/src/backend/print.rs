//! Writes manifests to stdout instead of deploying them.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use taskpail_core::{ComponentKind, ComponentUpdate, Llir, Message, QueueStats, RunContext, RunEvent, Utilization};
use taskpail_queue::QueueClient;
use taskpail_status::{QueueStatsPoller, StatusError, Streamer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::manifest;
use super::{Backend, BackendError};

pub struct Print;

/// Write YAML documents to stdout as one stream.
pub fn write_documents(docs: impl Iterator<Item = String>) -> Result<(), BackendError> {
    let mut out = std::io::stdout().lock();
    for doc in docs {
        writeln!(out, "---")?;
        write!(out, "{}", doc)?;
    }
    out.flush()?;
    Ok(())
}

#[async_trait]
impl Backend for Print {
    async fn apply(&self, llir: &Llir, _namespace: &str, _context: &str) -> Result<(), BackendError> {
        write_documents(manifest::render(llir)?.into_iter())
    }

    async fn delete(&self, llir: &Llir, _namespace: &str, _context: &str) -> Result<(), BackendError> {
        write_documents(manifest::render(llir)?.into_iter().rev())
    }

    fn streamer(&self, run: &RunContext, _namespace: &str, client: QueueClient) -> Box<dyn Streamer> {
        Box::new(QueueOnlyStreamer {
            run: run.clone(),
            client,
        })
    }
}

/// Nothing is deployed, so only the queue can be observed.
struct QueueOnlyStreamer {
    run: RunContext,
    client: QueueClient,
}

#[async_trait]
impl Streamer for QueueOnlyStreamer {
    async fn run_events(
        &self,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RunEvent>, StatusError> {
        Err(StatusError::Unsupported("run events"))
    }

    async fn component_updates(
        &self,
        _cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<ComponentUpdate>, mpsc::Receiver<Message>), StatusError> {
        // Both senders are dropped: the streams end immediately.
        let (_, updates) = mpsc::channel(1);
        let (_, messages) = mpsc::channel(1);
        Ok((updates, messages))
    }

    async fn utilization(
        &self,
        _interval: Duration,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Utilization>, StatusError> {
        Err(StatusError::Unsupported("utilization"))
    }

    async fn queue_stats(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<QueueStats>, StatusError> {
        Ok(QueueStatsPoller::new(self.client.clone(), self.run.clone()).spawn(interval, 16, cancel))
    }

    async fn component_logs(
        &self,
        _component: ComponentKind,
        _follow: bool,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<String>, StatusError> {
        Err(StatusError::Unsupported("logs"))
    }
}
