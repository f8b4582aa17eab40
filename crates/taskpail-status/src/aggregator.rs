//! Merges a streamer's independent streams into status snapshots.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::StreamConfig;
use crate::error::StatusError;
use crate::model::StatusModel;
use crate::streamer::Streamer;

/// Owns the status lifecycle of one UI session.
pub struct Aggregator {
    app_name: String,
    run_name: String,
    config: StreamConfig,
}

impl Aggregator {
    pub fn new(app_name: impl Into<String>, run_name: impl Into<String>, config: StreamConfig) -> Self {
        Self {
            app_name: app_name.into(),
            run_name: run_name.into(),
            config,
        }
    }

    /// Subscribe to the streamer and publish a fresh snapshot after every
    /// change.
    ///
    /// The returned channel closes once `cancel` fires or every source
    /// stream has ended.
    pub async fn start(
        self,
        streamer: &dyn Streamer,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Arc<StatusModel>>, StatusError> {
        let (mut updates, mut messages) = streamer.component_updates(cancel.child_token()).await?;
        let mut stats = streamer
            .queue_stats(self.config.queue_poll_interval, cancel.child_token())
            .await?;

        let (tx, rx) = mpsc::channel(self.config.channel_buffer.max(1));
        let mut model = StatusModel::new(self.app_name, self.run_name, self.config.message_capacity);

        tokio::spawn(async move {
            info!(run = %model.run_name, "status aggregator started");

            // Initial snapshot so the view can draw before any event arrives.
            if tx.send(Arc::new(model.clone())).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(update) = updates.recv() => model.apply_update(&update),
                    Some(message) = messages.recv() => model.push_message(message),
                    Some(s) = stats.recv() => model.apply_queue_stats(s),
                    else => break,
                }

                if tx.send(Arc::new(model.clone())).await.is_err() {
                    break;
                }
            }
            debug!(run = %model.run_name, "status aggregator stopped");
        });

        Ok(rx)
    }
}
