//! Where a run's buckets live.
//!
//! `object_store` handles a single bucket per store, so providers map bucket
//! names to stores and answer the bucket-level questions the queue protocol
//! needs (does it exist yet, can it be created).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tracing::{debug, info};

use crate::config::S3Options;
use crate::error::QueueError;

/// Source of per-bucket object stores.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Returns true once the bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, QueueError>;

    /// Create the bucket if the provider can, otherwise require it to exist.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), QueueError>;

    /// Store handle for one bucket.
    fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, QueueError>;
}

/// Buckets held in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    buckets: Mutex<HashMap<String, Arc<InMemory>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a pre-populated bucket.
    pub fn insert(&self, bucket: &str, store: InMemory) {
        self.lock().insert(bucket.to_string(), Arc::new(store));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<InMemory>>> {
        // a poisoned map is still structurally valid
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StoreProvider for MemoryProvider {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, QueueError> {
        Ok(self.lock().contains_key(bucket))
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), QueueError> {
        self.lock()
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(InMemory::new()));
        Ok(())
    }

    fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, QueueError> {
        self.lock()
            .get(bucket)
            .cloned()
            .map(|store| store as Arc<dyn ObjectStore>)
            .ok_or_else(|| QueueError::BucketMissing(bucket.to_string()))
    }
}

/// One directory per bucket under a root directory.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }
}

#[async_trait]
impl StoreProvider for LocalProvider {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, QueueError> {
        Ok(tokio::fs::metadata(self.dir(bucket))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), QueueError> {
        let dir = self.dir(bucket);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(bucket, dir = %dir.display(), "ensured local bucket");
        Ok(())
    }

    fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, QueueError> {
        let dir = self.dir(bucket);
        if !dir.is_dir() {
            return Err(QueueError::BucketMissing(bucket.to_string()));
        }
        let store = LocalFileSystem::new_with_prefix(&dir)?;
        Ok(Arc::new(store))
    }
}

/// Pause between bucket checks while waiting for the queue service.
const BUCKET_POLL: Duration = Duration::from_secs(1);

/// Buckets on an S3-compatible endpoint.
///
/// Atomic claims need conditional copies, configured per store from
/// [`S3Options::copy_if_not_exists`].
pub struct S3Provider {
    options: S3Options,
    bucket_wait: Duration,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl S3Provider {
    pub fn new(options: S3Options) -> Self {
        info!(
            endpoint = %options.endpoint,
            region = %options.region,
            copy_if_not_exists = %options.copy_if_not_exists,
            "S3 queue provider"
        );
        Self {
            options,
            bucket_wait: Duration::from_secs(60),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Builder method to set how long `ensure_bucket` waits for a bucket.
    pub fn with_bucket_wait(mut self, wait: Duration) -> Self {
        self.bucket_wait = wait;
        self
    }

    pub fn options(&self) -> &S3Options {
        &self.options
    }

    fn build(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, QueueError> {
        let endpoint = if self.options.endpoint.starts_with("http://")
            || self.options.endpoint.starts_with("https://")
        {
            self.options.endpoint.clone()
        } else {
            format!("https://{}", self.options.endpoint)
        };

        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&self.options.region)
            .with_access_key_id(&self.options.access_key_id)
            .with_secret_access_key(&self.options.secret_access_key)
            .with_allow_http(endpoint.starts_with("http://"))
            .with_virtual_hosted_style_request(false)
            .with_endpoint(endpoint)
            .with_config(AmazonS3ConfigKey::CopyIfNotExists, &self.options.copy_if_not_exists)
            .build()?;
        Ok(Arc::new(store))
    }
}

#[async_trait]
impl StoreProvider for S3Provider {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, QueueError> {
        let store = self.bucket(bucket)?;
        let mut listing = store.list(None);
        match listing.next().await {
            None | Some(Ok(_)) => Ok(true),
            Some(Err(object_store::Error::NotFound { .. })) => Ok(false),
            Some(Err(e)) if e.to_string().contains("NoSuchBucket") => Ok(false),
            Some(Err(e)) => Err(e.into()),
        }
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), QueueError> {
        // object_store cannot create buckets; the run's queue service creates
        // it shortly after starting
        let deadline = tokio::time::Instant::now() + self.bucket_wait;
        loop {
            let exists = self.bucket_exists(bucket).await;
            match exists {
                Ok(true) => return Ok(()),
                Ok(false) => debug!(bucket, "waiting for bucket"),
                Err(ref e) => debug!(bucket, error = %e, "waiting for queue endpoint"),
            }
            if tokio::time::Instant::now() >= deadline {
                return match exists {
                    Err(e) => Err(e),
                    Ok(_) => Err(QueueError::BucketMissing(bucket.to_string())),
                };
            }
            tokio::time::sleep(BUCKET_POLL).await;
        }
    }

    fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, QueueError> {
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }
        let store = self.build(bucket)?;
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}
