//! Events emitted while observing a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llir::ComponentKind;
use crate::status::WorkerStatus;

/// How an instance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// A health/lifecycle transition of one component instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentUpdate {
    pub component: ComponentKind,
    /// Process name (pod name, pid, ...).
    pub instance: String,
    /// Pool the instance belongs to, for workers.
    pub pool: Option<String>,
    pub status: WorkerStatus,
    pub event_type: EventType,
}

impl ComponentUpdate {
    /// Create an update for an instance that was added or changed.
    pub fn new(component: ComponentKind, instance: impl Into<String>, status: WorkerStatus) -> Self {
        Self {
            component,
            instance: instance.into(),
            pool: None,
            status,
            event_type: EventType::Modified,
        }
    }

    /// Builder method to set the pool.
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Builder method to set the event type.
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }
}

/// A free-text status message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: DateTime<Utc>,
    /// Who produced the message (component or instance name).
    pub who: String,
    pub message: String,
}

impl Message {
    pub fn new(who: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            who: who.into(),
            message: message.into(),
        }
    }
}

/// A platform event concerning a run (scheduling, image pulls, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    /// Object the event is about.
    pub object: String,
    pub message: String,
}

/// CPU and memory sample for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerUtilization {
    pub instance: String,
    pub component: ComponentKind,
    /// CPU usage in millicores.
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// One utilization sample across all instances of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub workers: Vec<WorkerUtilization>,
}

impl Utilization {
    /// Instances ordered by component, then name.
    pub fn sorted(&self) -> Vec<&WorkerUtilization> {
        let mut workers: Vec<&WorkerUtilization> = self.workers.iter().collect();
        workers.sort_by(|a, b| {
            a.component
                .cmp(&b.component)
                .then_with(|| a.instance.cmp(&b.instance))
        });
        workers
    }

    /// Total CPU usage in millicores.
    pub fn total_cpu_millis(&self) -> u64 {
        self.workers.iter().map(|w| w.cpu_millis).sum()
    }

    pub fn total_memory_bytes(&self) -> u64 {
        self.workers.iter().map(|w| w.memory_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_sorted() {
        let u = Utilization {
            workers: vec![
                WorkerUtilization {
                    instance: "w-b".to_string(),
                    component: ComponentKind::Workers,
                    cpu_millis: 10,
                    memory_bytes: 1,
                },
                WorkerUtilization {
                    instance: "d".to_string(),
                    component: ComponentKind::Dispatcher,
                    cpu_millis: 5,
                    memory_bytes: 2,
                },
                WorkerUtilization {
                    instance: "w-a".to_string(),
                    component: ComponentKind::Workers,
                    cpu_millis: 1,
                    memory_bytes: 3,
                },
            ],
        };
        let names: Vec<&str> = u.sorted().iter().map(|w| w.instance.as_str()).collect();
        assert_eq!(names, vec!["d", "w-a", "w-b"]);
        assert_eq!(u.total_cpu_millis(), 16);
        assert_eq!(u.total_memory_bytes(), 6);
    }
}
