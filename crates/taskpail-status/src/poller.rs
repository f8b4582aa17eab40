//! Queue statistics by periodic listing. Shared by every backend's streamer.

use std::time::Duration;

use taskpail_core::{QueueStats, RunContext};
use taskpail_queue::QueueClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Polls a run's queue and publishes its counts.
#[derive(Clone)]
pub struct QueueStatsPoller {
    client: QueueClient,
    run: RunContext,
}

impl QueueStatsPoller {
    pub fn new(client: QueueClient, run: RunContext) -> Self {
        Self { client, run }
    }

    /// Start polling every `interval`.
    ///
    /// Listing failures are logged and retried on the next tick. The channel
    /// closes when `cancel` fires or the receiver is dropped.
    pub fn spawn(
        self,
        interval: Duration,
        buffer: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<QueueStats> {
        let (tx, rx) = mpsc::channel(buffer.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last: Option<QueueStats> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let stats = match self.client.stats(&self.run).await {
                    Ok(stats) => stats,
                    Err(e) => {
                        warn!(run = %self.run.run_name, error = %e, "queue listing failed");
                        continue;
                    }
                };

                // Listings can lag; unchanged counts are not republished.
                if last.as_ref() == Some(&stats) {
                    continue;
                }
                last = Some(stats.clone());

                if tx.send(stats).await.is_err() {
                    break;
                }
            }
            debug!(run = %self.run.run_name, "queue stats poller stopped");
        });

        rx
    }
}
