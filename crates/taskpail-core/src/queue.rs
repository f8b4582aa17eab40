//! Queue addressing: run contexts, key prefixes and derived queue counts.
//!
//! A task's lifecycle state is the prefix its key lives under. Every run is
//! rooted at `runs/<run>/step/<step>/` inside the run's bucket:
//!
//! ```text
//! unassigned/<task>
//! inbox/<pool>/<task>
//! processing/<pool>/<task>
//! success/<pool>/<task>
//! failure/<pool>/<task>
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::RunName;

/// Default port of the run-internal queue service.
pub const DEFAULT_QUEUE_PORT: u16 = 9000;

/// Identifies one execution. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    /// Run name.
    pub run_name: RunName,
    /// Bucket holding this run's queue.
    pub bucket: String,
    /// Step counter for multi-step pipelines.
    pub step: u32,
    /// Port of the run-internal queue endpoint.
    pub queue_port: u16,
}

impl RunContext {
    /// Create a context for step 0 on the default queue port.
    pub fn new(run_name: impl Into<RunName>, bucket: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            bucket: bucket.into(),
            step: 0,
            queue_port: DEFAULT_QUEUE_PORT,
        }
    }

    /// Builder method to set the step.
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    /// Builder method to set the queue port.
    pub fn with_queue_port(mut self, port: u16) -> Self {
        self.queue_port = port;
        self
    }

    /// Root of every key belonging to this run and step.
    pub fn listen_prefix(&self) -> String {
        format!("runs/{}/step/{}", self.run_name, self.step)
    }

    /// Full path of one of the queue prefixes.
    pub fn prefix_path(&self, prefix: QueuePrefix) -> String {
        format!("{}/{}", self.listen_prefix(), prefix)
    }

    /// Key of a task waiting to be assigned.
    pub fn unassigned_key(&self, task: &str) -> String {
        format!("{}/{}", self.prefix_path(QueuePrefix::Unassigned), task)
    }

    /// Key of a task assigned to a pool.
    pub fn inbox_key(&self, pool: &str, task: &str) -> String {
        format!("{}/{}/{}", self.prefix_path(QueuePrefix::Inbox), pool, task)
    }

    /// Key of a task claimed by a worker of a pool.
    pub fn processing_key(&self, pool: &str, task: &str) -> String {
        format!("{}/{}/{}", self.prefix_path(QueuePrefix::Processing), pool, task)
    }

    /// Key of a task that reached a terminal state.
    pub fn outcome_key(&self, outcome: TaskOutcome, pool: &str, task: &str) -> String {
        format!("{}/{}/{}", self.prefix_path(outcome.prefix()), pool, task)
    }

    /// Strip this run's listen prefix from a full key.
    pub fn relative<'a>(&self, key: &'a str) -> Result<&'a str, CoreError> {
        let prefix = self.listen_prefix();
        key.strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| CoreError::ForeignKey {
                key: key.to_string(),
                prefix,
            })
    }
}

/// The five logical queue prefixes. Membership in a prefix is the task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePrefix {
    Unassigned,
    Inbox,
    Processing,
    Success,
    Failure,
}

impl QueuePrefix {
    /// All prefixes in lifecycle order.
    pub const ALL: [QueuePrefix; 5] = [
        QueuePrefix::Unassigned,
        QueuePrefix::Inbox,
        QueuePrefix::Processing,
        QueuePrefix::Success,
        QueuePrefix::Failure,
    ];

    /// Path segment used in object keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePrefix::Unassigned => "unassigned",
            QueuePrefix::Inbox => "inbox",
            QueuePrefix::Processing => "processing",
            QueuePrefix::Success => "success",
            QueuePrefix::Failure => "failure",
        }
    }

    /// Parse a path segment.
    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == segment)
    }

    /// Whether tasks under this prefix are scoped to a pool.
    pub fn is_pool_scoped(&self) -> bool {
        !matches!(self, QueuePrefix::Unassigned)
    }
}

impl fmt::Display for QueuePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Success,
    Failure,
}

impl TaskOutcome {
    /// Prefix holding tasks with this outcome.
    pub fn prefix(&self) -> QueuePrefix {
        match self {
            TaskOutcome::Success => QueuePrefix::Success,
            TaskOutcome::Failure => QueuePrefix::Failure,
        }
    }

    /// Process exit code conventionally associated with the outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskOutcome::Success => 0,
            TaskOutcome::Failure => 1,
        }
    }
}

/// Coordinates of a queue endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    /// Whether the queue is provisioned automatically alongside the run.
    #[serde(default)]
    pub auto: bool,
    pub bucket: String,
    pub endpoint: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
}

impl QueueSpec {
    /// Return a copy pointing at another endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Return a copy that is not auto-provisioned.
    pub fn no_auto(mut self) -> Self {
        self.auto = false;
        self
    }
}

/// Per-pool queue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolQueueStats {
    pub inbox: usize,
    pub processing: usize,
    pub success: usize,
    pub failure: usize,
}

impl PoolQueueStats {
    /// Tasks handed to this pool but not finished yet.
    pub fn backlog(&self) -> usize {
        self.inbox + self.processing
    }
}

/// Point-in-time key counts for a run. Derived from listings, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub unassigned: usize,
    pub pools: BTreeMap<String, PoolQueueStats>,
}

impl QueueStats {
    /// Count one key, given relative to the run's listen prefix.
    ///
    /// Returns false for keys that are not a task in a known prefix.
    pub fn record(&mut self, relative_key: &str) -> bool {
        let mut parts = relative_key.splitn(3, '/');
        let Some(prefix) = parts.next().and_then(QueuePrefix::from_segment) else {
            return false;
        };

        if !prefix.is_pool_scoped() {
            let has_task = parts.next().is_some_and(|t| !t.is_empty());
            if has_task {
                self.unassigned += 1;
            }
            return has_task;
        }

        let (Some(pool), Some(task)) = (parts.next(), parts.next()) else {
            return false;
        };
        if pool.is_empty() || task.is_empty() {
            return false;
        }

        let counts = self.pools.entry(pool.to_string()).or_default();
        match prefix {
            QueuePrefix::Inbox => counts.inbox += 1,
            QueuePrefix::Processing => counts.processing += 1,
            QueuePrefix::Success => counts.success += 1,
            QueuePrefix::Failure => counts.failure += 1,
            QueuePrefix::Unassigned => unreachable!("unassigned is not pool scoped"),
        }
        true
    }

    /// Counts for one pool (zero if the pool has no keys yet).
    pub fn pool(&self, name: &str) -> PoolQueueStats {
        self.pools.get(name).copied().unwrap_or_default()
    }

    /// Tasks assigned to any pool.
    pub fn inbox(&self) -> usize {
        self.pools.values().map(|p| p.inbox).sum()
    }

    pub fn processing(&self) -> usize {
        self.pools.values().map(|p| p.processing).sum()
    }

    pub fn success(&self) -> usize {
        self.pools.values().map(|p| p.success).sum()
    }

    pub fn failure(&self) -> usize {
        self.pools.values().map(|p| p.failure).sum()
    }

    /// Total number of tasks in any state.
    pub fn total(&self) -> usize {
        self.unassigned + self.inbox() + self.processing() + self.success() + self.failure()
    }

    /// True once every known task reached a terminal state.
    pub fn is_drained(&self) -> bool {
        self.total() > 0 && self.unassigned == 0 && self.inbox() == 0 && self.processing() == 0
    }
}
