//! taskpail queue protocol.
//!
//! A run's queue is nothing but keys in an object store bucket. Moving a
//! task between prefixes is a state transition; see
//! [`taskpail_core::queue`] for the key layout.
//!
//! - [`QueueClient`] enqueues, lists and transitions tasks
//! - [`WorkStealer`] assigns unassigned tasks to pool inboxes and requeues
//!   tasks held past their lease
//! - [`StoreProvider`] abstracts where buckets live (local disk, S3, memory)

pub mod client;
pub mod config;
pub mod error;
pub mod lease;
pub mod lifecycle;
pub mod provider;
pub mod workstealer;

pub use client::{EnqueueOptions, QueueClient};
pub use config::{QueueConfig, S3Options};
pub use error::QueueError;
pub use lease::{HeldTask, LeaseTracker};
pub use provider::{LocalProvider, MemoryProvider, S3Provider, StoreProvider};
pub use workstealer::WorkStealer;
