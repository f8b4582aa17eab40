//! Enqueue, list and download.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use futures::stream::{self, Stream, StreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use taskpail_core::{QueuePrefix, QueueStats, RunContext, TaskOutcome};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::lease::HeldTask;
use crate::provider::StoreProvider;

/// Buffer between a listing producer and its consumer.
const LIST_BUFFER: usize = 256;

/// Store path for a queue key, kept verbatim.
///
/// `ObjectPath::from` would percent-encode characters such as `%` or `#`
/// in task names, so listings would no longer match the names enqueued.
pub(crate) fn object_path(key: &str) -> Result<ObjectPath, QueueError> {
    ObjectPath::parse(key).map_err(|_| QueueError::InvalidPath(key.to_string()))
}

/// Options for enqueueing a single file.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Task name to use instead of the file's basename.
    pub alias: Option<String>,

    /// Block until the task reaches a terminal state.
    pub wait: bool,
}

/// Client for one queue store.
#[derive(Clone)]
pub struct QueueClient {
    provider: Arc<dyn StoreProvider>,
    config: QueueConfig,
}

impl QueueClient {
    pub fn new(provider: Arc<dyn StoreProvider>) -> Self {
        Self {
            provider,
            config: QueueConfig::default(),
        }
    }

    /// Builder method to set the configuration.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn StoreProvider> {
        &self.provider
    }

    pub(crate) fn store(&self, run: &RunContext) -> Result<Arc<dyn ObjectStore>, QueueError> {
        self.provider.bucket(&run.bucket)
    }

    /// Upload a task body under `unassigned/<task>`. Returns the full key.
    pub async fn enqueue_bytes(
        &self,
        run: &RunContext,
        task: &str,
        body: Bytes,
    ) -> Result<String, QueueError> {
        let key = run.unassigned_key(task);
        self.store(run)?
            .put(&object_path(&key)?, body.into())
            .await?;
        debug!(run = %run.run_name, key = %key, "enqueued task");
        Ok(key)
    }

    /// Enqueue a local file.
    ///
    /// With `wait`, returns the task's outcome once it appears under
    /// `success/` or `failure/`.
    pub async fn enqueue(
        &self,
        run: &RunContext,
        file: &Path,
        opts: &EnqueueOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<TaskOutcome>, QueueError> {
        let task = match &opts.alias {
            Some(alias) => alias.clone(),
            None => file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| QueueError::InvalidPath(file.display().to_string()))?,
        };

        self.provider.ensure_bucket(&run.bucket).await?;
        let body = tokio::fs::read(file).await?;
        self.enqueue_bytes(run, &task, Bytes::from(body)).await?;

        if !opts.wait {
            return Ok(None);
        }
        self.wait_for_outcome(run, &task, cancel).await.map(Some)
    }

    /// Enqueue several files concurrently as `task.1.txt`, `task.2.txt`, ...
    ///
    /// Every file is attempted; the first error is returned and tasks that
    /// were enqueued stay enqueued.
    pub async fn enqueue_many(
        &self,
        run: &RunContext,
        files: &[PathBuf],
        opts: &EnqueueOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<TaskOutcome>>, QueueError> {
        let results = join_all(files.iter().enumerate().map(|(i, file)| {
            let opts = EnqueueOptions {
                alias: Some(format!("task.{}.txt", i + 1)),
                wait: opts.wait,
            };
            async move { self.enqueue(run, file, &opts, cancel).await }
        }))
        .await;

        results.into_iter().collect()
    }

    /// Enqueue literal values as `task.0.txt`, `task.1.txt`, ...
    pub async fn enqueue_values(
        &self,
        run: &RunContext,
        values: &[String],
    ) -> Result<(), QueueError> {
        self.provider.ensure_bucket(&run.bucket).await?;
        for (i, value) in values.iter().enumerate() {
            self.enqueue_bytes(run, &format!("task.{}.txt", i), Bytes::from(value.clone()))
                .await?;
        }
        Ok(())
    }

    /// Copy every object under `bucket/path` of `origin` into the run's
    /// unassigned queue, `repeat` times each.
    ///
    /// Waits indefinitely for the source bucket to exist. Returns the number
    /// of tasks enqueued.
    pub async fn enqueue_from_remote(
        &self,
        run: &RunContext,
        origin: &dyn StoreProvider,
        path: &str,
        repeat: u32,
        cancel: &CancellationToken,
    ) -> Result<usize, QueueError> {
        let (bucket, prefix) = path.split_once('/').unwrap_or((path, ""));
        if bucket.is_empty() {
            return Err(QueueError::InvalidPath(path.to_string()));
        }
        let prefix = prefix.trim_matches('/');

        self.provider.ensure_bucket(&run.bucket).await?;
        self.wait_for_bucket(origin, bucket, cancel).await?;

        let source = origin.bucket(bucket)?;
        let dest = self.store(run)?;

        let listing_prefix = (!prefix.is_empty()).then(|| object_path(prefix)).transpose()?;
        let mut objects = Vec::new();
        let mut listing = source.list(listing_prefix.as_ref());
        while let Some(meta) = listing.next().await {
            objects.push(meta?.location);
        }
        drop(listing);

        let copies: Vec<(ObjectPath, String)> = objects
            .iter()
            .flat_map(|src| {
                (1..=repeat).map(move |r| {
                    let task = repeated_task_name(src.as_ref(), r);
                    (src.clone(), run.unassigned_key(&task))
                })
            })
            .collect();

        info!(
            run = %run.run_name,
            source = %path,
            objects = objects.len(),
            repeat,
            "enqueueing from remote"
        );

        let results: Vec<Result<(), QueueError>> = stream::iter(copies)
            .map(|(src, dst)| {
                let source = source.clone();
                let dest = dest.clone();
                async move {
                    let body = source.get(&src).await?.bytes().await?;
                    dest.put(&object_path(&dst)?, body.into()).await?;
                    debug!(src = %src, dst = %dst, "copied task");
                    Ok::<(), QueueError>(())
                }
            })
            .buffer_unordered(self.config.copy_concurrency.max(1))
            .collect()
            .await;

        let mut enqueued = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => enqueued += 1,
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => warn!(error = %e, "additional copy failure"),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(enqueued),
        }
    }

    async fn wait_for_bucket(
        &self,
        origin: &dyn StoreProvider,
        bucket: &str,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        loop {
            match origin.bucket_exists(bucket).await {
                Ok(true) => return Ok(()),
                Ok(false) => info!(bucket, "waiting for source bucket to exist"),
                Err(e) => warn!(bucket, error = %e, "failed to check source bucket, retrying"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = tokio::time::sleep(self.config.bucket_poll_interval) => {}
            }
        }
    }

    /// Poll until `task` reaches a terminal state in any pool.
    pub async fn wait_for_outcome(
        &self,
        run: &RunContext,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, QueueError> {
        loop {
            if let Some(outcome) = self.find_outcome(run, task).await? {
                info!(run = %run.run_name, task, ?outcome, "task completed");
                return Ok(outcome);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = tokio::time::sleep(self.config.completion_poll_interval) => {}
            }
        }
    }

    async fn find_outcome(
        &self,
        run: &RunContext,
        task: &str,
    ) -> Result<Option<TaskOutcome>, QueueError> {
        let store = self.store(run)?;
        for outcome in [TaskOutcome::Success, TaskOutcome::Failure] {
            let prefix = object_path(&run.prefix_path(outcome.prefix()))?;
            let mut listing = store.list(Some(&prefix));
            while let Some(meta) = listing.next().await {
                if meta?.location.filename() == Some(task) {
                    return Ok(Some(outcome));
                }
            }
        }
        Ok(None)
    }

    /// Stream the keys under `runs/<run>/step/<step>/<sub_path>`, with that
    /// prefix stripped.
    ///
    /// The listing runs in a spawned producer. A failed item is passed on
    /// and the listing carries on; the stream ends when the listing is
    /// exhausted.
    pub fn list(&self, run: &RunContext, sub_path: &str) -> ReceiverStream<Result<String, QueueError>> {
        let (tx, rx) = mpsc::channel(LIST_BUFFER);
        let sub_path = sub_path.trim_matches('/');
        let prefix = if sub_path.is_empty() {
            run.listen_prefix()
        } else {
            format!("{}/{}", run.listen_prefix(), sub_path)
        };
        let store = self.store(run);

        tokio::spawn(async move {
            let target = store.and_then(|store| Ok((store, object_path(&prefix)?)));
            let (store, path) = match target {
                Ok(target) => target,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            forward_keys(store.list(Some(&path)), &prefix, &tx).await;
        });

        ReceiverStream::new(rx)
    }

    /// Count every task of the run by state. A missing bucket counts as empty.
    pub async fn stats(&self, run: &RunContext) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        if !self.provider.bucket_exists(&run.bucket).await? {
            return Ok(stats);
        }

        let store = self.store(run)?;
        let prefix = object_path(&run.listen_prefix())?;
        let mut listing = store.list(Some(&prefix));
        while let Some(meta) = listing.next().await {
            let meta = meta?;
            let relative = run.relative(meta.location.as_ref())?;
            if !stats.record(relative) {
                debug!(key = %meta.location, "ignoring non-task key");
            }
        }
        Ok(stats)
    }

    /// Task names currently under an unscoped or pool-scoped prefix.
    pub async fn tasks(
        &self,
        run: &RunContext,
        prefix: QueuePrefix,
        pool: Option<&str>,
    ) -> Result<Vec<String>, QueueError> {
        let sub_path = match pool {
            Some(pool) if prefix.is_pool_scoped() => format!("{}/{}", prefix, pool),
            _ => prefix.to_string(),
        };
        let mut keys = self.list(run, &sub_path);
        let mut tasks = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key?;
            if !key.is_empty() && !key.contains('/') {
                tasks.push(key);
            }
        }
        tasks.sort();
        Ok(tasks)
    }

    /// Tasks held under a pool-scoped prefix, in every pool or only in `pool`.
    pub async fn held_tasks(
        &self,
        run: &RunContext,
        prefix: QueuePrefix,
        pool: Option<&str>,
    ) -> Result<Vec<HeldTask>, QueueError> {
        let scope = match pool {
            Some(pool) => format!("{}/{}", run.prefix_path(prefix), pool),
            None => run.prefix_path(prefix),
        };
        let store = self.store(run)?;
        let path = object_path(&scope)?;

        let mut held = Vec::new();
        let mut listing = store.list(Some(&path));
        while let Some(meta) = listing.next().await {
            let meta = meta?;
            let relative = run.relative(meta.location.as_ref())?;
            let mut parts = relative.splitn(3, '/');
            let (Some(_), Some(pool), Some(task)) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            if pool.is_empty() || task.is_empty() || task.contains('/') {
                continue;
            }
            held.push(HeldTask {
                prefix,
                pool: pool.to_string(),
                task: task.to_string(),
                last_modified: meta.last_modified,
            });
        }
        Ok(held)
    }

    /// Download one object to a local file, creating parent directories.
    pub async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, QueueError> {
        let store = self.provider.bucket(bucket)?;
        let body = store.get(&object_path(key)?).await?.bytes().await?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &body).await?;
        info!(bucket, key, dest = %dest.display(), bytes = body.len(), "downloaded object");
        Ok(body.len() as u64)
    }
}

/// Send every listed key relative to `prefix` until the listing ends or the
/// receiver goes away.
async fn forward_keys(
    mut listing: impl Stream<Item = object_store::Result<ObjectMeta>> + Unpin,
    prefix: &str,
    tx: &mpsc::Sender<Result<String, QueueError>>,
) {
    while let Some(item) = listing.next().await {
        let item = item.map_err(QueueError::from).map(|meta| {
            let key = meta.location.as_ref();
            key.strip_prefix(prefix)
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or(key)
                .to_string()
        });
        if let Err(e) = &item {
            warn!(prefix, error = %e, "listing error");
        }
        if tx.send(item).await.is_err() {
            debug!(prefix, "listing receiver dropped");
            break;
        }
    }
}

/// `dir/data.csv` repeated `r` times is named `data.<r>.csv`.
fn repeated_task_name(key: &str, r: u32) -> String {
    let base = key.rsplit('/').next().unwrap_or(key);
    match base.rfind('.') {
        Some(i) if i > 0 => format!("{}.{}{}", &base[..i], r, &base[i..]),
        _ => format!("{}.{}", base, r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;
    use std::time::Duration;

    fn client() -> (QueueClient, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::new());
        let config = QueueConfig {
            bucket_poll_interval: Duration::from_millis(10),
            completion_poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        (QueueClient::new(provider.clone()).with_config(config), provider)
    }

    fn run() -> RunContext {
        RunContext::new("r1", "queue")
    }

    fn temp_file(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("taskpail-client-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    async fn keys(client: &QueueClient, sub_path: &str) -> Vec<String> {
        let mut keys: Vec<String> = client
            .list(&run(), sub_path)
            .map(|k| k.unwrap())
            .collect()
            .await;
        keys.sort();
        keys
    }

    #[test]
    fn test_repeated_task_name() {
        assert_eq!(repeated_task_name("dir/data.csv", 2), "data.2.csv");
        assert_eq!(repeated_task_name("a.tar.gz", 1), "a.tar.1.gz");
        assert_eq!(repeated_task_name("noext", 3), "noext.3");
    }

    #[tokio::test]
    async fn test_enqueue_uses_basename_or_alias() {
        let (client, _) = client();
        let file = temp_file("input.txt", "hello");
        let cancel = CancellationToken::new();

        let outcome = client
            .enqueue(&run(), &file, &EnqueueOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, None);

        let opts = EnqueueOptions {
            alias: Some("renamed".to_string()),
            wait: false,
        };
        client.enqueue(&run(), &file, &opts, &cancel).await.unwrap();

        assert_eq!(
            keys(&client, "unassigned").await,
            vec!["input.txt".to_string(), "renamed".to_string()]
        );
    }

    #[tokio::test]
    async fn test_enqueue_and_wait() {
        let (client, provider) = client();
        let file = temp_file("waited.txt", "x");
        let cancel = CancellationToken::new();

        let finisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let key = run().outcome_key(TaskOutcome::Failure, "p1", "waited.txt");
            provider
                .bucket("queue")
                .unwrap()
                .put(&ObjectPath::from(key.as_str()), Bytes::new().into())
                .await
                .unwrap();
        });

        let opts = EnqueueOptions {
            alias: None,
            wait: true,
        };
        let outcome = client.enqueue(&run(), &file, &opts, &cancel).await.unwrap();
        assert_eq!(outcome, Some(TaskOutcome::Failure));
        finisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let (client, _) = client();
        let file = temp_file("never.txt", "x");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let opts = EnqueueOptions {
            alias: None,
            wait: true,
        };
        let err = client.enqueue(&run(), &file, &opts, &cancel).await.unwrap_err();
        assert!(matches!(err, QueueError::Cancelled));
    }

    #[tokio::test]
    async fn test_enqueue_many_names_one_indexed() {
        let (client, _) = client();
        let files = vec![temp_file("m1", "a"), temp_file("m2", "b"), temp_file("m3", "c")];

        let outcomes = client
            .enqueue_many(&run(), &files, &EnqueueOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            keys(&client, "unassigned").await,
            vec!["task.1.txt", "task.2.txt", "task.3.txt"]
        );
    }

    #[tokio::test]
    async fn test_enqueue_many_reports_error_after_attempting_all() {
        let (client, _) = client();
        let files = vec![
            temp_file("ok1", "a"),
            PathBuf::from("/definitely/not/here"),
            temp_file("ok3", "c"),
        ];

        let result = client
            .enqueue_many(&run(), &files, &EnqueueOptions::default(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(QueueError::Io(_))));
        assert_eq!(keys(&client, "unassigned").await, vec!["task.1.txt", "task.3.txt"]);
    }

    #[tokio::test]
    async fn test_enqueue_values_zero_indexed() {
        let (client, provider) = client();
        client
            .enqueue_values(&run(), &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(keys(&client, "unassigned").await, vec!["task.0.txt", "task.1.txt"]);

        let body = provider
            .bucket("queue")
            .unwrap()
            .get(&ObjectPath::from(run().unassigned_key("task.1.txt").as_str()))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_enqueue_from_remote_waits_and_repeats() {
        let (client, _) = client();
        let origin = Arc::new(MemoryProvider::new());

        let source = object_store::memory::InMemory::new();
        for key in ["in/a.txt", "in/b", "other/c.txt"] {
            source
                .put(&ObjectPath::from(key), Bytes::from_static(b"data").into())
                .await
                .unwrap();
        }
        let creator = origin.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            creator.insert("src", source);
        });

        let enqueued = client
            .enqueue_from_remote(&run(), origin.as_ref(), "src/in", 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(enqueued, 4);
        assert_eq!(
            keys(&client, "unassigned").await,
            vec!["a.1.txt", "a.2.txt", "b.1", "b.2"]
        );
    }

    #[tokio::test]
    async fn test_enqueue_from_remote_cancelled_while_waiting() {
        let (client, _) = client();
        let origin = MemoryProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .enqueue_from_remote(&run(), &origin, "missing/x", 1, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Cancelled));
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let (client, _) = client();
        let run = run();
        assert_eq!(client.stats(&run).await.unwrap(), QueueStats::default());

        client.provider().ensure_bucket("queue").await.unwrap();
        let store = client.store(&run).unwrap();
        for key in [
            run.unassigned_key("t1"),
            run.inbox_key("p1", "t2"),
            run.processing_key("p1", "t3"),
            run.outcome_key(TaskOutcome::Success, "p2", "t4"),
            "runs/other/step/0/unassigned/x".to_string(),
        ] {
            store
                .put(&ObjectPath::from(key.as_str()), Bytes::new().into())
                .await
                .unwrap();
        }

        assert_eq!(keys(&client, "inbox").await, vec!["p1/t2"]);
        assert_eq!(
            client.tasks(&run, QueuePrefix::Processing, Some("p1")).await.unwrap(),
            vec!["t3"]
        );

        let stats = client.stats(&run).await.unwrap();
        assert_eq!(stats.unassigned, 1);
        assert_eq!(stats.pool("p1").backlog(), 2);
        assert_eq!(stats.success(), 1);
        assert_eq!(stats.total(), 4);
    }

    #[tokio::test]
    async fn test_enqueue_from_remote_keeps_names_verbatim() {
        let (client, _) = client();
        let origin = MemoryProvider::new();
        let source = object_store::memory::InMemory::new();
        source
            .put(&ObjectPath::parse("in/50%.txt").unwrap(), Bytes::from_static(b"x").into())
            .await
            .unwrap();
        origin.insert("src", source);

        client
            .enqueue_from_remote(&run(), &origin, "src/in", 1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(keys(&client, "unassigned").await, vec!["50%.1.txt"]);
    }

    #[tokio::test]
    async fn test_list_is_repeatable() {
        let (client, _) = client();
        let run = run();
        client.provider().ensure_bucket("queue").await.unwrap();
        let store = client.store(&run).unwrap();
        for key in [
            run.inbox_key("p1", "a"),
            run.inbox_key("p1", "b"),
            run.inbox_key("p2", "c"),
            run.processing_key("p1", "d"),
        ] {
            store.put(&object_path(&key).unwrap(), Bytes::new().into()).await.unwrap();
        }

        for sub_path in ["", "inbox", "inbox/p1", "/inbox/p1/"] {
            let first = keys(&client, sub_path).await;
            assert!(!first.is_empty());
            assert_eq!(keys(&client, sub_path).await, first);
        }
        assert_eq!(keys(&client, "inbox/p1").await, vec!["a", "b"]);
        assert_eq!(keys(&client, "inbox").await, vec!["p1/a", "p1/b", "p2/c"]);
    }

    #[tokio::test]
    async fn test_listing_continues_after_error() {
        let meta = |key: &str| ObjectMeta {
            location: ObjectPath::parse(key).unwrap(),
            last_modified: chrono::Utc::now(),
            size: 0,
            e_tag: None,
            version: None,
        };
        let listing = stream::iter(vec![
            Ok(meta("pre/a")),
            Err(object_store::Error::Generic {
                store: "test",
                source: "page failed".into(),
            }),
            Ok(meta("pre/b")),
        ]);

        let (tx, rx) = mpsc::channel(8);
        forward_keys(listing, "pre", &tx).await;
        drop(tx);

        let items: Vec<Result<String, QueueError>> = ReceiverStream::new(rx).collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref().unwrap(), "a");
        assert!(matches!(items[1], Err(QueueError::Store(_))));
        assert_eq!(items[2].as_deref().unwrap(), "b");
    }

    #[tokio::test]
    async fn test_held_tasks() {
        let (client, _) = client();
        let run = run();
        client.provider().ensure_bucket("queue").await.unwrap();
        let store = client.store(&run).unwrap();
        for key in [
            run.processing_key("p1", "a"),
            run.processing_key("p2", "b"),
            run.inbox_key("p1", "c"),
            format!("{}/nested/x", run.processing_key("p1", "dir")),
        ] {
            store.put(&object_path(&key).unwrap(), Bytes::new().into()).await.unwrap();
        }

        let held = client.held_tasks(&run, QueuePrefix::Processing, None).await.unwrap();
        let mut names: Vec<(String, String)> = held.into_iter().map(|h| (h.pool, h.task)).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                ("p1".to_string(), "a".to_string()),
                ("p2".to_string(), "b".to_string())
            ]
        );

        let held = client.held_tasks(&run, QueuePrefix::Inbox, Some("p1")).await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].prefix, QueuePrefix::Inbox);
        assert_eq!(held[0].task, "c");
    }

    #[tokio::test]
    async fn test_download() {
        let (client, provider) = client();
        provider.ensure_bucket("data").await.unwrap();
        provider
            .bucket("data")
            .unwrap()
            .put(&ObjectPath::from("dir/in.csv"), Bytes::from_static(b"1,2").into())
            .await
            .unwrap();

        let dest = std::env::temp_dir()
            .join(format!("taskpail-download-{}", std::process::id()))
            .join("input")
            .join("in.csv");
        let n = client.download("data", "dir/in.csv", &dest).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "1,2");
    }
}
