//! taskpail status.
//!
//! Backends expose a [`Streamer`] of independent, per-run event streams.
//! The [`Aggregator`] folds them into a [`StatusModel`] and publishes a fresh
//! snapshot after every change, for the status view to render.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod model;
pub mod poller;
pub mod streamer;

pub use aggregator::Aggregator;
pub use config::StreamConfig;
pub use error::StatusError;
pub use model::{Pool, StatusModel, Worker};
pub use poller::QueueStatsPoller;
pub use streamer::Streamer;
