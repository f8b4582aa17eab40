//! Claim leases.
//!
//! A task in a pool's inbox or in `processing/` is held by that pool. If the
//! pool's workers die the task would stay there for good, so a task held
//! past the lease is handed out again: the work stealer requeues it and the
//! pool's own workers release stale claims back to the inbox.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use taskpail_core::QueuePrefix;

/// A task sitting under a pool-scoped prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldTask {
    pub prefix: QueuePrefix,
    pub pool: String,
    pub task: String,
    pub last_modified: DateTime<Utc>,
}

impl HeldTask {
    fn key(&self) -> String {
        format!("{}/{}/{}", self.prefix, self.pool, self.task)
    }
}

/// Tracks how long held tasks have been observed.
///
/// A task expires once its object is older than the lease and this tracker
/// has watched it for at least as long. Local directories keep the original
/// modification time across renames, which is what the second half is for.
#[derive(Debug)]
pub struct LeaseTracker {
    lease: Duration,
    first_seen: HashMap<String, Instant>,
}

impl LeaseTracker {
    pub fn new(lease: Duration) -> Self {
        Self {
            lease,
            first_seen: HashMap::new(),
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// The entries of `held` whose lease ran out. Tasks missing from `held`
    /// are forgotten, so a task that shows up again starts a fresh lease.
    pub fn expired(&mut self, held: Vec<HeldTask>) -> Vec<HeldTask> {
        let now = Instant::now();
        let cutoff = chrono::Duration::from_std(self.lease)
            .ok()
            .and_then(|lease| Utc::now().checked_sub_signed(lease));

        let mut seen = HashMap::with_capacity(held.len());
        let mut expired = Vec::new();
        for task in held {
            let key = task.key();
            let since = self.first_seen.get(&key).copied().unwrap_or(now);
            let watched = now.duration_since(since) >= self.lease;
            let stale = cutoff.is_some_and(|cutoff| task.last_modified <= cutoff);
            seen.insert(key, since);
            if watched && stale {
                expired.push(task);
            }
        }
        self.first_seen = seen;
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(task: &str, age: chrono::Duration) -> HeldTask {
        HeldTask {
            prefix: QueuePrefix::Processing,
            pool: "p".to_string(),
            task: task.to_string(),
            last_modified: Utc::now() - age,
        }
    }

    #[test]
    fn test_first_sighting_starts_the_lease() {
        let mut leases = LeaseTracker::new(Duration::from_millis(30));
        let old = held("t", chrono::Duration::hours(1));
        assert!(leases.expired(vec![old.clone()]).is_empty());

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(leases.expired(vec![old.clone()]), vec![old]);
    }

    #[test]
    fn test_recently_modified_task_is_kept() {
        let mut leases = LeaseTracker::new(Duration::from_millis(30));
        let fresh = held("t", -chrono::Duration::hours(1));
        leases.expired(vec![fresh.clone()]);

        std::thread::sleep(Duration::from_millis(40));
        assert!(leases.expired(vec![fresh]).is_empty());
    }

    #[test]
    fn test_vanished_task_is_forgotten() {
        let mut leases = LeaseTracker::new(Duration::from_millis(30));
        let old = held("t", chrono::Duration::hours(1));
        leases.expired(vec![old.clone()]);
        std::thread::sleep(Duration::from_millis(40));

        // gone for one round, then back under the same name
        assert!(leases.expired(vec![]).is_empty());
        assert!(leases.expired(vec![old]).is_empty());
    }

    #[test]
    fn test_prefixes_are_tracked_separately() {
        let mut leases = LeaseTracker::new(Duration::from_millis(30));
        let claimed = held("t", chrono::Duration::hours(1));
        leases.expired(vec![claimed.clone()]);
        std::thread::sleep(Duration::from_millis(40));

        let queued = HeldTask {
            prefix: QueuePrefix::Inbox,
            ..claimed.clone()
        };
        assert_eq!(leases.expired(vec![claimed.clone(), queued]), vec![claimed]);
    }
}
