//! The work stealer: the only writer moving tasks out of `unassigned/`,
//! and the one that puts tasks held past their lease back there.

use std::collections::BTreeMap;
use std::sync::Mutex;

use taskpail_core::{QueuePrefix, RunContext};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::QueueClient;
use crate::error::QueueError;
use crate::lease::LeaseTracker;

/// Assigns unassigned tasks to the pool with the smallest backlog.
pub struct WorkStealer {
    client: QueueClient,
    leases: Mutex<LeaseTracker>,
}

impl WorkStealer {
    pub fn new(client: QueueClient) -> Self {
        let leases = Mutex::new(LeaseTracker::new(client.config().claim_lease));
        Self { client, leases }
    }

    /// Run one assignment round. Returns the number of tasks assigned.
    ///
    /// Inbox and processing tasks held past the claim lease are requeued
    /// first. With no `pools`, the pools already present in the queue are
    /// used. Ties between equally loaded pools go to the first pool by name.
    pub async fn steal_round(&self, run: &RunContext, pools: &[String]) -> Result<usize, QueueError> {
        if !self.client.provider().bucket_exists(&run.bucket).await? {
            return Ok(0);
        }
        self.requeue_expired(run).await?;

        let stats = self.client.stats(run).await?;
        if stats.unassigned == 0 {
            return Ok(0);
        }

        let mut backlog: BTreeMap<String, usize> = if pools.is_empty() {
            stats.pools.iter().map(|(p, s)| (p.clone(), s.backlog())).collect()
        } else {
            pools
                .iter()
                .map(|p| (p.clone(), stats.pool(p).backlog()))
                .collect()
        };
        if backlog.is_empty() {
            debug!(run = %run.run_name, "no pools to assign to");
            return Ok(0);
        }

        let tasks = self.client.tasks(run, QueuePrefix::Unassigned, None).await?;
        let mut assigned = 0;
        for task in tasks {
            let Some(pool) = least_loaded(&backlog) else {
                break;
            };
            if self.client.assign(run, &task, &pool).await? {
                *backlog.entry(pool).or_insert(0) += 1;
                assigned += 1;
            }
        }

        if assigned > 0 {
            info!(run = %run.run_name, assigned, "assigned tasks");
        }
        Ok(assigned)
    }

    /// Requeue every inbox or processing task whose lease ran out. Returns
    /// the number of tasks requeued.
    pub async fn requeue_expired(&self, run: &RunContext) -> Result<usize, QueueError> {
        let mut held = self.client.held_tasks(run, QueuePrefix::Inbox, None).await?;
        held.extend(self.client.held_tasks(run, QueuePrefix::Processing, None).await?);

        let expired = self
            .leases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .expired(held);

        let mut requeued = 0;
        for task in expired {
            if self.client.requeue(run, task.prefix, &task.pool, &task.task).await? {
                requeued += 1;
            }
        }
        if requeued > 0 {
            warn!(run = %run.run_name, requeued, "requeued tasks held past their lease");
        }
        Ok(requeued)
    }

    /// Run rounds every `steal_interval` until cancelled. Round failures are
    /// logged and retried on the next round.
    pub async fn run(&self, run: &RunContext, pools: &[String], cancel: CancellationToken) {
        info!(run = %run.run_name, pools = ?pools, "work stealer started");
        loop {
            if let Err(e) = self.steal_round(run, pools).await {
                warn!(run = %run.run_name, error = %e, "work stealer round failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.client.config().steal_interval) => {}
            }
        }
        info!(run = %run.run_name, "work stealer stopped");
    }
}

fn least_loaded(backlog: &BTreeMap<String, usize>) -> Option<String> {
    backlog
        .iter()
        .min_by(|(a_name, a), (b_name, b)| a.cmp(b).then_with(|| a_name.cmp(b_name)))
        .map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryProvider, StoreProvider};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup() -> (QueueClient, RunContext) {
        let provider = Arc::new(MemoryProvider::new());
        provider.ensure_bucket("q").await.unwrap();
        (QueueClient::new(provider), RunContext::new("r", "q"))
    }

    #[test]
    fn test_least_loaded_tie_break() {
        let backlog = BTreeMap::from([
            ("b".to_string(), 1),
            ("a".to_string(), 1),
            ("c".to_string(), 3),
        ]);
        assert_eq!(least_loaded(&backlog).as_deref(), Some("a"));
        assert_eq!(least_loaded(&BTreeMap::new()), None);
    }

    #[tokio::test]
    async fn test_steal_round_balances() {
        let (client, run) = setup().await;
        for i in 0..5 {
            client
                .enqueue_bytes(&run, &format!("t{}", i), Bytes::new())
                .await
                .unwrap();
        }
        // p2 already has work
        client.enqueue_bytes(&run, "busy", Bytes::new()).await.unwrap();
        assert!(client.assign(&run, "busy", "p2").await.unwrap());

        let stealer = WorkStealer::new(client.clone());
        let pools = vec!["p1".to_string(), "p2".to_string()];
        assert_eq!(stealer.steal_round(&run, &pools).await.unwrap(), 5);

        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.unassigned, 0);
        assert_eq!(stats.pool("p1").inbox, 3);
        assert_eq!(stats.pool("p2").inbox, 3);

        // nothing left
        assert_eq!(stealer.steal_round(&run, &pools).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_steal_round_without_pools() {
        let (client, run) = setup().await;
        client.enqueue_bytes(&run, "t", Bytes::new()).await.unwrap();
        let stealer = WorkStealer::new(client.clone());
        assert_eq!(stealer.steal_round(&run, &[]).await.unwrap(), 0);
        assert_eq!(client.stats(&run).await.unwrap().unassigned, 1);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let (client, run) = setup().await;
        let client = client.with_config(crate::QueueConfig {
            steal_interval: Duration::from_millis(10),
            ..Default::default()
        });
        let stealer = WorkStealer::new(client.clone());
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            let run = run.clone();
            tokio::spawn(async move {
                stealer.run(&run, &["p".to_string()], cancel).await;
            })
        };

        client.enqueue_bytes(&run, "late", Bytes::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(client.stats(&run).await.unwrap().pool("p").inbox, 1);
    }

    #[tokio::test]
    async fn test_expired_claim_is_reassigned() {
        let (client, run) = setup().await;
        let client = client.with_config(crate::QueueConfig {
            claim_lease: Duration::from_millis(20),
            ..Default::default()
        });
        client.enqueue_bytes(&run, "t", Bytes::new()).await.unwrap();
        assert!(client.assign(&run, "t", "dead").await.unwrap());
        assert!(client.claim(&run, "dead", "t").await.unwrap());

        let stealer = WorkStealer::new(client.clone());
        let pools = vec!["dead".to_string(), "live".to_string()];

        // first sighting starts the lease
        assert_eq!(stealer.steal_round(&run, &pools).await.unwrap(), 0);
        assert_eq!(client.stats(&run).await.unwrap().pool("dead").processing, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stealer.steal_round(&run, &pools).await.unwrap(), 1);

        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.pool("dead").processing, 0);
        assert_eq!(stats.unassigned, 0);
        assert_eq!(stats.pool("dead").inbox + stats.pool("live").inbox, 1);
    }

    #[tokio::test]
    async fn test_live_claims_are_left_alone() {
        let (client, run) = setup().await;
        client.enqueue_bytes(&run, "t", Bytes::new()).await.unwrap();
        assert!(client.assign(&run, "t", "p").await.unwrap());
        assert!(client.claim(&run, "p", "t").await.unwrap());

        let stealer = WorkStealer::new(client.clone());
        for _ in 0..3 {
            assert_eq!(stealer.requeue_expired(&run).await.unwrap(), 0);
        }
        assert_eq!(client.stats(&run).await.unwrap().pool("p").processing, 1);
    }
}
