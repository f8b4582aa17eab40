//! Lifecycle status of component instances.

use serde::{Deserialize, Serialize};

/// Status of one process (pod, local process, ...) of a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Scheduled but not started.
    #[default]
    Pending,
    /// Started, still initializing (e.g. resolving needs, copying datasets in).
    Booting,
    /// Running its main command.
    Running,
    /// Exited successfully.
    Succeeded,
    /// Exited with an error.
    Failed,
    /// Being torn down.
    Terminating,
    /// Status could not be determined.
    Unknown,
}

impl WorkerStatus {
    /// Returns true if the instance counts as running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the instance will not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Map a platform phase string (`Pending`, `Running`, ...) to a status.
    pub fn from_phase(phase: &str) -> Self {
        match phase.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "containercreating" | "podinitializing" | "init" | "booting" => Self::Booting,
            "running" => Self::Running,
            "succeeded" | "completed" => Self::Succeeded,
            "failed" | "error" | "crashloopbackoff" => Self::Failed,
            "terminating" => Self::Terminating,
            _ => Self::Unknown,
        }
    }
}
