//! Stream configuration.

use std::time::Duration;

/// Polling intervals and buffer sizes for status streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Interval between queue listings.
    pub queue_poll_interval: Duration,

    /// Interval between utilization samples.
    pub utilization_interval: Duration,

    /// Recent messages kept by the status model.
    pub message_capacity: usize,

    /// Channel buffer for every stream.
    pub channel_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_poll_interval: Duration::from_secs(1),
            utilization_interval: Duration::from_secs(5),
            message_capacity: 100,
            channel_buffer: 64,
        }
    }
}
