//! The streaming interface every deployment backend provides for a run.

use std::time::Duration;

use async_trait::async_trait;
use taskpail_core::{ComponentKind, ComponentUpdate, Message, QueueStats, RunEvent, Utilization};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::StatusError;

/// Independent, cancellable streams describing one run.
///
/// Each call spawns a producer owning the sender half; the producer closes
/// its channel when the underlying source ends, fails, or `cancel` fires.
#[async_trait]
pub trait Streamer: Send + Sync {
    /// Platform events (scheduling, image pulls, ...).
    async fn run_events(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RunEvent>, StatusError>;

    /// Component lifecycle updates, plus free-text messages about them.
    async fn component_updates(
        &self,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<ComponentUpdate>, mpsc::Receiver<Message>), StatusError>;

    /// CPU and memory samples every `interval`.
    async fn utilization(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Utilization>, StatusError>;

    /// Queue counts every `interval`.
    async fn queue_stats(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<QueueStats>, StatusError>;

    /// Log lines of one component, optionally following new output.
    async fn component_logs(
        &self,
        component: ComponentKind,
        follow: bool,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<String>, StatusError>;
}
