//! taskpail Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Object storage
//! - Deployment platforms
//! - Runtime specifics
//!
//! All types here describe what a run looks like: the declarative model a
//! user authors (HLIR), the component topology it lowers to (LLIR), and the
//! queue addressing every component shares.

pub mod error;
pub mod event;
pub mod hlir;
pub mod ids;
pub mod llir;
pub mod queue;
pub mod status;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{ComponentUpdate, EventType, Message, RunEvent, Utilization, WorkerUtilization};
pub use hlir::Hlir;
pub use ids::RunName;
pub use llir::{Component, ComponentKind, Llir, RunnableSpec, Sizing};
pub use queue::{PoolQueueStats, QueuePrefix, QueueSpec, QueueStats, RunContext, TaskOutcome};
pub use status::WorkerStatus;
