//! Task state transitions.
//!
//! ```text
//! unassigned/<t> ──assign──▶ inbox/<pool>/<t> ──claim──▶ processing/<pool>/<t>
//!                                                             │ finish
//!                                                             ▼
//!                                               success|failure/<pool>/<t>
//! ```
//!
//! `assign` and `claim` are conditional renames: when several writers race
//! for the same task exactly one of them observes `true`. Tasks held past
//! their lease go back the other way: `requeue` returns an inbox or
//! processing task to `unassigned/` and `release` returns a claim to its
//! pool's inbox.

use bytes::Bytes;
use object_store::ObjectStore;
use taskpail_core::{QueuePrefix, RunContext, TaskOutcome};
use tracing::{debug, info, warn};

use crate::client::{object_path, QueueClient};
use crate::error::QueueError;

impl QueueClient {
    /// Move an unassigned task into a pool's inbox.
    pub async fn assign(&self, run: &RunContext, task: &str, pool: &str) -> Result<bool, QueueError> {
        let from = run.unassigned_key(task);
        let to = run.inbox_key(pool, task);
        let moved = transition(self.store(run)?.as_ref(), &from, &to).await?;
        if moved {
            debug!(run = %run.run_name, task, pool, "assigned task");
        }
        Ok(moved)
    }

    /// Claim a task from a pool's inbox for processing.
    pub async fn claim(&self, run: &RunContext, pool: &str, task: &str) -> Result<bool, QueueError> {
        let from = run.inbox_key(pool, task);
        let to = run.processing_key(pool, task);
        let claimed = transition(self.store(run)?.as_ref(), &from, &to).await?;
        if claimed {
            debug!(run = %run.run_name, task, pool, "claimed task");
        }
        Ok(claimed)
    }

    /// Hand a task held by `pool` back to `unassigned/`.
    ///
    /// Only inbox and processing tasks can be requeued.
    pub async fn requeue(
        &self,
        run: &RunContext,
        prefix: QueuePrefix,
        pool: &str,
        task: &str,
    ) -> Result<bool, QueueError> {
        let from = match prefix {
            QueuePrefix::Inbox => run.inbox_key(pool, task),
            QueuePrefix::Processing => run.processing_key(pool, task),
            _ => return Ok(false),
        };
        let to = run.unassigned_key(task);
        let moved = transition(self.store(run)?.as_ref(), &from, &to).await?;
        if moved {
            info!(run = %run.run_name, task, pool, %prefix, "requeued task");
        }
        Ok(moved)
    }

    /// Put a claimed task back into its pool's inbox.
    pub async fn release(&self, run: &RunContext, pool: &str, task: &str) -> Result<bool, QueueError> {
        let from = run.processing_key(pool, task);
        let to = run.inbox_key(pool, task);
        let moved = transition(self.store(run)?.as_ref(), &from, &to).await?;
        if moved {
            info!(run = %run.run_name, task, pool, "released task");
        }
        Ok(moved)
    }

    /// Record the outcome of a claimed task.
    ///
    /// A claim that is gone was handed out again after its lease ran out;
    /// the outcome is dropped and the task runs again elsewhere.
    pub async fn finish(
        &self,
        run: &RunContext,
        pool: &str,
        task: &str,
        outcome: TaskOutcome,
    ) -> Result<(), QueueError> {
        let from = object_path(&run.processing_key(pool, task))?;
        let to = object_path(&run.outcome_key(outcome, pool, task))?;
        match self.store(run)?.rename(&from, &to).await {
            Ok(()) => {
                info!(run = %run.run_name, task, pool, ?outcome, "task finished");
                Ok(())
            }
            Err(object_store::Error::NotFound { .. }) => {
                warn!(run = %run.run_name, task, pool, ?outcome, "claim lost before finishing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read the body stored under a full key of the run's bucket.
    pub async fn fetch(&self, run: &RunContext, key: &str) -> Result<Bytes, QueueError> {
        let body = self
            .store(run)?
            .get(&object_path(key)?)
            .await?
            .bytes()
            .await?;
        Ok(body)
    }
}

/// First-writer-wins rename. A missing source or an existing destination
/// means another writer got there first.
async fn transition(store: &dyn ObjectStore, from: &str, to: &str) -> Result<bool, QueueError> {
    let from = object_path(from)?;
    let to = object_path(to)?;
    match store.rename_if_not_exists(&from, &to).await {
        Ok(()) => Ok(true),
        Err(object_store::Error::AlreadyExists { .. }) | Err(object_store::Error::NotFound { .. }) => {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryProvider, StoreProvider};
    use std::sync::Arc;
    use taskpail_core::QueuePrefix;

    async fn setup() -> (QueueClient, RunContext) {
        let provider = Arc::new(MemoryProvider::new());
        provider.ensure_bucket("q").await.unwrap();
        (QueueClient::new(provider), RunContext::new("r", "q"))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (client, run) = setup().await;
        client
            .enqueue_bytes(&run, "t1", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        assert!(client.assign(&run, "t1", "p").await.unwrap());
        assert!(client.claim(&run, "p", "t1").await.unwrap());

        let body = client.fetch(&run, &run.processing_key("p", "t1")).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"payload"));

        client.finish(&run, "p", "t1", TaskOutcome::Success).await.unwrap();

        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.pool("p").success, 1);
        assert!(stats.is_drained());
    }

    #[tokio::test]
    async fn test_claim_first_writer_wins() {
        let (client, run) = setup().await;
        client.enqueue_bytes(&run, "t", Bytes::new()).await.unwrap();
        assert!(client.assign(&run, "t", "p").await.unwrap());

        let claims = futures::future::join_all((0..8).map(|_| client.claim(&run, "p", "t"))).await;
        let winners = claims.into_iter().filter(|c| matches!(c, Ok(true))).count();
        assert_eq!(winners, 1);

        assert_eq!(
            client.tasks(&run, QueuePrefix::Processing, Some("p")).await.unwrap(),
            vec!["t"]
        );
        assert!(client.tasks(&run, QueuePrefix::Inbox, Some("p")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assign_is_exclusive_across_pools() {
        let (client, run) = setup().await;
        client.enqueue_bytes(&run, "t", Bytes::new()).await.unwrap();

        assert!(client.assign(&run, "t", "p1").await.unwrap());
        assert!(!client.assign(&run, "t", "p2").await.unwrap());

        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.pool("p1").inbox, 1);
        assert_eq!(stats.pool("p2").inbox, 0);
        assert_eq!(stats.total(), 1);
    }

    #[tokio::test]
    async fn test_claim_missing_task() {
        let (client, run) = setup().await;
        assert!(!client.claim(&run, "p", "ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_names_are_stored_verbatim() {
        let (client, run) = setup().await;
        for task in ["50%.txt", "a#b"] {
            client.enqueue_bytes(&run, task, Bytes::new()).await.unwrap();
            assert!(client.assign(&run, task, "p").await.unwrap());
            assert!(client.claim(&run, "p", task).await.unwrap());
            client.finish(&run, "p", task, TaskOutcome::Success).await.unwrap();
        }

        assert_eq!(
            client.tasks(&run, QueuePrefix::Success, Some("p")).await.unwrap(),
            vec!["50%.txt", "a#b"]
        );
        let outcome = client
            .wait_for_outcome(&run, "50%.txt", &tokio_util::sync::CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Success);
    }

    #[tokio::test]
    async fn test_requeue_and_release() {
        let (client, run) = setup().await;
        client.enqueue_bytes(&run, "a", Bytes::new()).await.unwrap();
        client.enqueue_bytes(&run, "b", Bytes::new()).await.unwrap();
        assert!(client.assign(&run, "a", "p").await.unwrap());
        assert!(client.assign(&run, "b", "p").await.unwrap());
        assert!(client.claim(&run, "p", "b").await.unwrap());

        assert!(client.requeue(&run, QueuePrefix::Inbox, "p", "a").await.unwrap());
        assert!(client.release(&run, "p", "b").await.unwrap());
        // already moved
        assert!(!client.release(&run, "p", "b").await.unwrap());
        assert!(!client.requeue(&run, QueuePrefix::Success, "p", "b").await.unwrap());

        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.unassigned, 1);
        assert_eq!(stats.pool("p").inbox, 1);
        assert_eq!(stats.pool("p").processing, 0);
    }

    #[tokio::test]
    async fn test_finish_after_lost_claim() {
        let (client, run) = setup().await;
        client.enqueue_bytes(&run, "t", Bytes::new()).await.unwrap();
        assert!(client.assign(&run, "t", "p").await.unwrap());
        assert!(client.claim(&run, "p", "t").await.unwrap());
        assert!(client.requeue(&run, QueuePrefix::Processing, "p", "t").await.unwrap());

        client.finish(&run, "p", "t", TaskOutcome::Success).await.unwrap();
        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.unassigned, 1);
        assert_eq!(stats.success(), 0);
    }
}
