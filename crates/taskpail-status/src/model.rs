//! The status model: everything the status view shows about one run.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use taskpail_core::{ComponentKind, ComponentUpdate, EventType, Message, QueueStats, WorkerStatus};

/// Pool name used for worker updates that do not name a pool.
pub const DEFAULT_POOL: &str = "default";

/// One instance of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub name: String,
    pub status: WorkerStatus,
}

/// A worker pool and its instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub name: String,
    pub workers: Vec<Worker>,
}

impl Pool {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: Vec::new(),
        }
    }

    /// Running and total worker counts.
    pub fn workers_split(&self) -> (usize, usize) {
        StatusModel::split(&self.workers)
    }
}

/// Snapshot of a run, rebuilt on every change.
#[derive(Debug, Clone)]
pub struct StatusModel {
    pub app_name: String,
    pub run_name: String,

    /// Shell components and other run infrastructure.
    pub runtime: Vec<Worker>,
    pub queue: Vec<Worker>,
    pub dispatcher: Vec<Worker>,
    pub workstealer: Vec<Worker>,

    /// Pools in first-seen order.
    pub pools: Vec<Pool>,

    /// Latest queue counts.
    pub qstat: QueueStats,

    messages: VecDeque<Message>,
    capacity: usize,

    /// When the model last changed.
    pub last_event: DateTime<Utc>,
}

impl StatusModel {
    pub fn new(app_name: impl Into<String>, run_name: impl Into<String>, capacity: usize) -> Self {
        Self {
            app_name: app_name.into(),
            run_name: run_name.into(),
            runtime: Vec::new(),
            queue: Vec::new(),
            dispatcher: Vec::new(),
            workstealer: Vec::new(),
            pools: Vec::new(),
            qstat: QueueStats::default(),
            messages: VecDeque::with_capacity(capacity),
            capacity,
            last_event: Utc::now(),
        }
    }

    /// Running and total counts of a set of instances.
    pub fn split(workers: &[Worker]) -> (usize, usize) {
        let running = workers.iter().filter(|w| w.status.is_running()).count();
        (running, workers.len())
    }

    pub fn num_pools(&self) -> usize {
        self.pools.len()
    }

    /// Tasks sitting in any pool's inbox.
    pub fn all_inbox(&self) -> usize {
        self.qstat.inbox()
    }

    /// Largest count shown in any bar.
    pub fn max_count(&self) -> usize {
        let q = &self.qstat;
        let global = [q.unassigned, q.inbox(), q.processing(), q.success(), q.failure()];
        let per_pool = q
            .pools
            .values()
            .flat_map(|p| [p.inbox, p.processing, p.success, p.failure]);
        global.into_iter().chain(per_pool).max().unwrap_or(0)
    }

    /// The newest `n` messages, oldest first.
    pub fn messages(&self, n: usize) -> Vec<&Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Append a message, evicting the oldest one when full.
    pub fn push_message(&mut self, message: Message) {
        if self.capacity == 0 {
            return;
        }
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.last_event = message.timestamp;
        self.messages.push_back(message);
    }

    /// Fold one component update into the model.
    pub fn apply_update(&mut self, update: &ComponentUpdate) {
        let instances = match update.component {
            ComponentKind::Workers => {
                let name = update.pool.as_deref().unwrap_or(DEFAULT_POOL);
                &mut self.pool_mut(name).workers
            }
            ComponentKind::Dispatcher => &mut self.dispatcher,
            ComponentKind::WorkStealer => &mut self.workstealer,
            ComponentKind::Queue => &mut self.queue,
            ComponentKind::Shell => &mut self.runtime,
        };

        match update.event_type {
            EventType::Deleted => instances.retain(|w| w.name != update.instance),
            EventType::Added | EventType::Modified => {
                match instances.iter_mut().find(|w| w.name == update.instance) {
                    Some(w) => w.status = update.status,
                    None => instances.push(Worker {
                        name: update.instance.clone(),
                        status: update.status,
                    }),
                }
            }
        }
        self.last_event = Utc::now();
    }

    /// Replace the queue counts. Pools seen only in the queue are added.
    pub fn apply_queue_stats(&mut self, stats: QueueStats) {
        for name in stats.pools.keys() {
            self.pool_mut(name);
        }
        self.qstat = stats;
        self.last_event = Utc::now();
    }

    fn pool_mut(&mut self, name: &str) -> &mut Pool {
        let idx = match self.pools.iter().position(|p| p.name == name) {
            Some(idx) => idx,
            None => {
                self.pools.push(Pool::new(name));
                self.pools.len() - 1
            }
        };
        &mut self.pools[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(kind: ComponentKind, name: &str, status: WorkerStatus) -> ComponentUpdate {
        ComponentUpdate::new(kind, name, status)
    }

    #[test]
    fn test_apply_updates() {
        let mut model = StatusModel::new("app", "run", 10);
        model.apply_update(&update(ComponentKind::Dispatcher, "d", WorkerStatus::Booting));
        model.apply_update(&update(ComponentKind::Dispatcher, "d", WorkerStatus::Running));
        model.apply_update(
            &update(ComponentKind::Workers, "w1", WorkerStatus::Running).with_pool("p1"),
        );
        model.apply_update(
            &update(ComponentKind::Workers, "w2", WorkerStatus::Pending).with_pool("p1"),
        );
        model.apply_update(&update(ComponentKind::Workers, "w3", WorkerStatus::Running));

        assert_eq!(StatusModel::split(&model.dispatcher), (1, 1));
        assert_eq!(model.num_pools(), 2);
        assert_eq!(model.pools[0].name, "p1");
        assert_eq!(model.pools[0].workers_split(), (1, 2));
        assert_eq!(model.pools[1].name, DEFAULT_POOL);

        model.apply_update(
            &update(ComponentKind::Workers, "w2", WorkerStatus::Pending)
                .with_pool("p1")
                .with_event_type(EventType::Deleted),
        );
        assert_eq!(model.pools[0].workers_split(), (1, 1));
    }

    #[test]
    fn test_queue_stats_and_counts() {
        let mut model = StatusModel::new("app", "run", 10);
        let mut stats = QueueStats::default();
        for key in [
            "unassigned/a",
            "inbox/p1/b",
            "inbox/p2/c",
            "success/p1/d",
            "success/p1/e",
            "success/p1/f",
        ] {
            stats.record(key);
        }
        model.apply_queue_stats(stats);

        assert_eq!(model.all_inbox(), 2);
        assert_eq!(model.max_count(), 3);
        let names: Vec<_> = model.pools.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["p1", "p2"]);
    }

    #[test]
    fn test_message_ring() {
        let mut model = StatusModel::new("app", "run", 3);
        for i in 0..5 {
            model.push_message(Message::new("w", format!("m{}", i)));
        }
        assert_eq!(model.message_count(), 3);

        let newest: Vec<_> = model.messages(2).iter().map(|m| m.message.as_str()).collect();
        assert_eq!(newest, vec!["m3", "m4"]);
        let all: Vec<_> = model.messages(10).iter().map(|m| m.message.as_str()).collect();
        assert_eq!(all, vec!["m2", "m3", "m4"]);
        assert!(model.messages(0).is_empty());
    }
}
