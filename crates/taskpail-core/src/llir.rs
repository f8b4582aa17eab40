//! Low-level model: the deployable component topology produced by lowering.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::queue::{QueueSpec, RunContext};

/// Role a component plays in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Originates work for the run.
    Dispatcher,
    /// Moves unassigned tasks into pool inboxes.
    WorkStealer,
    /// Claims and processes tasks.
    Workers,
    /// A plain command with no queue role.
    Shell,
    /// The run's queue service. Provisioned by backends for auto queues,
    /// never produced by lowering.
    Queue,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Dispatcher => "dispatcher",
            ComponentKind::WorkStealer => "workstealer",
            ComponentKind::Workers => "workers",
            ComponentKind::Shell => "shell",
            ComponentKind::Queue => "queue",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources requested for a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sizing {
    /// Number of processes (parallelism).
    pub workers: u32,
    /// CPU request, e.g. `500m` or `2`.
    pub cpu: String,
    /// Memory request, e.g. `512Mi`.
    pub memory: String,
    pub gpu: u32,
}

impl Default for Sizing {
    fn default() -> Self {
        Self {
            workers: 1,
            cpu: "500m".to_string(),
            memory: "512Mi".to_string(),
            gpu: 0,
        }
    }
}

/// What a component runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnableSpec {
    pub image: Option<String>,
    /// Shell command line.
    pub command: String,
    pub env: BTreeMap<String, String>,
}

/// A deployable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub kind: ComponentKind,
    pub instance_name: String,
    /// Pool whose inbox this component consumes (workers only).
    pub pool: Option<String>,
    pub sizing: Sizing,
    pub spec: RunnableSpec,
}

impl Component {
    /// Create a component with default sizing and an empty spec.
    pub fn new(kind: ComponentKind, instance_name: impl Into<String>) -> Self {
        Self {
            kind,
            instance_name: instance_name.into(),
            pool: None,
            sizing: Sizing::default(),
            spec: RunnableSpec::default(),
        }
    }

    /// Builder method to set the command.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.spec.command = command.into();
        self
    }

    /// Builder method to set an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }
}

/// A complete topology for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Llir {
    /// Application (or build) name the topology was compiled from.
    pub app_name: String,
    pub context: RunContext,
    pub queue: QueueSpec,
    /// Components in application order.
    pub components: Vec<Component>,
    /// Resources the compiler does not interpret, applied first.
    pub others: Vec<serde_yaml::Value>,
}

impl Llir {
    /// Components of a given kind.
    pub fn components_of(&self, kind: ComponentKind) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(move |c| c.kind == kind)
    }

    /// Distinct pool names, in first-seen order.
    pub fn pools(&self) -> Vec<&str> {
        let mut pools: Vec<&str> = Vec::new();
        for pool in self.components.iter().filter_map(|c| c.pool.as_deref()) {
            if !pools.contains(&pool) {
                pools.push(pool);
            }
        }
        pools
    }

    /// Total requested workers across all worker components.
    pub fn total_workers(&self) -> u32 {
        self.components_of(ComponentKind::Workers)
            .map(|c| c.sizing.workers)
            .sum()
    }

    /// Number of components of each kind, for logging.
    pub fn component_kinds(&self) -> BTreeMap<ComponentKind, usize> {
        let mut kinds = BTreeMap::new();
        for c in &self.components {
            *kinds.entry(c.kind).or_insert(0) += 1;
        }
        kinds
    }

    /// Check the structural invariants of a topology.
    pub fn validate(&self) -> Result<(), CoreError> {
        let dispatchers = self.components_of(ComponentKind::Dispatcher).count();
        if dispatchers > 1 {
            return Err(CoreError::InvalidTopology(format!(
                "expected at most one dispatcher, found {}",
                dispatchers
            )));
        }

        let stealers = self.components_of(ComponentKind::WorkStealer).count();
        if stealers > 1 {
            return Err(CoreError::InvalidTopology(format!(
                "expected at most one workstealer, found {}",
                stealers
            )));
        }

        for c in self.components_of(ComponentKind::Workers) {
            if c.sizing.workers == 0 {
                return Err(CoreError::InvalidTopology(format!(
                    "worker component '{}' has no workers",
                    c.instance_name
                )));
            }
            if c.pool.is_none() {
                return Err(CoreError::InvalidTopology(format!(
                    "worker component '{}' is not attached to a pool",
                    c.instance_name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llir(components: Vec<Component>) -> Llir {
        Llir {
            app_name: "app".to_string(),
            context: RunContext::new("r", "b"),
            queue: QueueSpec::default(),
            components,
            others: Vec::new(),
        }
    }

    fn workers(name: &str, pool: &str, n: u32) -> Component {
        let mut c = Component::new(ComponentKind::Workers, name);
        c.pool = Some(pool.to_string());
        c.sizing.workers = n;
        c
    }

    #[test]
    fn test_validate_ok() {
        let t = llir(vec![
            Component::new(ComponentKind::Dispatcher, "d"),
            workers("p-0", "p", 2),
            workers("p-1", "p", 1),
            Component::new(ComponentKind::WorkStealer, "ws"),
        ]);
        assert!(t.validate().is_ok());
        assert_eq!(t.pools(), vec!["p"]);
        assert_eq!(t.total_workers(), 3);
        assert_eq!(t.component_kinds().get(&ComponentKind::Workers), Some(&2));
    }

    #[test]
    fn test_validate_two_dispatchers() {
        let t = llir(vec![
            Component::new(ComponentKind::Dispatcher, "d1"),
            Component::new(ComponentKind::Dispatcher, "d2"),
        ]);
        assert!(matches!(t.validate(), Err(CoreError::InvalidTopology(_))));
    }

    #[test]
    fn test_validate_empty_pool() {
        let t = llir(vec![workers("p", "p", 0)]);
        assert!(t.validate().is_err());
    }
}
