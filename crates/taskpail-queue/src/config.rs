//! Queue configuration.

use std::time::Duration;

use taskpail_core::QueueSpec;

use crate::error::QueueError;

/// Copy-in variables scoped to a single download or enqueue command.
pub const ENV_ENDPOINT: &str = "taskpail_queue_endpoint";
pub const ENV_ACCESS_KEY_ID: &str = "taskpail_queue_accessKeyID";
pub const ENV_SECRET_ACCESS_KEY: &str = "taskpail_queue_secretAccessKey";

/// Default region for S3-compatible endpoints that ignore it.
pub const DEFAULT_REGION: &str = "us-east-1";

/// How S3 stores guard `rename_if_not_exists`, in `object_store` syntax.
pub const ENV_COPY_IF_NOT_EXISTS: &str = "AWS_COPY_IF_NOT_EXISTS";

/// Conditional copies through multipart uploads with `If-None-Match`.
pub const DEFAULT_COPY_IF_NOT_EXISTS: &str = "multipart";

/// Queue client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Backoff while waiting for a source bucket to exist.
    pub bucket_poll_interval: Duration,

    /// Poll interval while waiting for an enqueued task to finish.
    pub completion_poll_interval: Duration,

    /// Pause between work stealer rounds.
    pub steal_interval: Duration,

    /// Maximum concurrent object copies.
    pub copy_concurrency: usize,

    /// How long a pool may hold a task before it is handed out again.
    pub claim_lease: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            bucket_poll_interval: Duration::from_secs(1),
            completion_poll_interval: Duration::from_secs(1),
            steal_interval: Duration::from_secs(2),
            copy_concurrency: 32,
            claim_lease: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `TASKPAIL_*` environment variables.
    pub fn from_env() -> Result<Self, QueueError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, QueueError> {
        let mut config = Self::default();

        let millis = |key: &str| -> Result<Option<Duration>, QueueError> {
            lookup(key)
                .map(|v| {
                    v.parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|e| QueueError::Config(format!("{}: {}", key, e)))
                })
                .transpose()
        };

        if let Some(d) = millis("TASKPAIL_BUCKET_POLL_INTERVAL_MS")? {
            config.bucket_poll_interval = d;
        }
        if let Some(d) = millis("TASKPAIL_COMPLETION_POLL_INTERVAL_MS")? {
            config.completion_poll_interval = d;
        }
        if let Some(d) = millis("TASKPAIL_STEAL_INTERVAL_MS")? {
            config.steal_interval = d;
        }
        if let Some(d) = millis("TASKPAIL_CLAIM_LEASE_MS")? {
            config.claim_lease = d;
        }
        if let Some(v) = lookup("TASKPAIL_COPY_CONCURRENCY") {
            config.copy_concurrency = v
                .parse::<usize>()
                .map_err(|e| QueueError::Config(format!("TASKPAIL_COPY_CONCURRENCY: {}", e)))?
                .max(1);
        }

        Ok(config)
    }
}

/// Coordinates and credentials of an S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Options {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,

    /// Passed to `object_store` as `AmazonS3ConfigKey::CopyIfNotExists`.
    pub copy_if_not_exists: String,
}

impl S3Options {
    pub fn new(
        endpoint: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: DEFAULT_REGION.to_string(),
            copy_if_not_exists: std::env::var(ENV_COPY_IF_NOT_EXISTS)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_COPY_IF_NOT_EXISTS.to_string()),
        }
    }

    /// Read the copy-in variables.
    pub fn from_env() -> Result<Self, QueueError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, QueueError> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| QueueError::Config(format!("{} is not set", key)))
        };

        let mut options = Self::new(
            require(ENV_ENDPOINT)?,
            require(ENV_ACCESS_KEY_ID)?,
            require(ENV_SECRET_ACCESS_KEY)?,
        );
        if let Some(region) = lookup("AWS_REGION").filter(|r| !r.is_empty()) {
            options.region = region;
        }
        if let Some(mode) = lookup(ENV_COPY_IF_NOT_EXISTS).filter(|m| !m.is_empty()) {
            options.copy_if_not_exists = mode;
        }
        Ok(options)
    }

    /// Options for a resolved queue spec.
    pub fn from_spec(spec: &QueueSpec) -> Self {
        Self::new(&spec.endpoint, &spec.access_key, &spec.secret_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.copy_concurrency, 32);
        assert_eq!(config.claim_lease, Duration::from_secs(600));
    }

    #[test]
    fn test_queue_config_overrides() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("TASKPAIL_STEAL_INTERVAL_MS", "250"),
            ("TASKPAIL_COPY_CONCURRENCY", "0"),
            ("TASKPAIL_CLAIM_LEASE_MS", "5000"),
        ]))
        .unwrap();
        assert_eq!(config.steal_interval, Duration::from_millis(250));
        assert_eq!(config.claim_lease, Duration::from_secs(5));
        assert_eq!(config.copy_concurrency, 1);

        let err = QueueConfig::from_lookup(lookup(&[("TASKPAIL_STEAL_INTERVAL_MS", "soon")]));
        assert!(matches!(err, Err(QueueError::Config(_))));
    }

    #[test]
    fn test_s3_options_from_env() {
        let options = S3Options::from_lookup(lookup(&[
            (ENV_ENDPOINT, "http://minio:9000"),
            (ENV_ACCESS_KEY_ID, "AK"),
            (ENV_SECRET_ACCESS_KEY, "SK"),
        ]))
        .unwrap();
        assert_eq!(options.endpoint, "http://minio:9000");
        assert_eq!(options.region, DEFAULT_REGION);

        let missing = S3Options::from_lookup(lookup(&[(ENV_ENDPOINT, "http://minio:9000")]));
        assert!(missing.is_err());
    }

    #[test]
    fn test_s3_options_copy_if_not_exists() {
        let vars = [
            (ENV_ENDPOINT, "http://minio:9000"),
            (ENV_ACCESS_KEY_ID, "AK"),
            (ENV_SECRET_ACCESS_KEY, "SK"),
        ];
        let options = S3Options::from_lookup(lookup(&vars)).unwrap();
        assert!(!options.copy_if_not_exists.is_empty());

        let header = "header:cf-copy-destination-if-none-match:*";
        let mut vars = vars.to_vec();
        vars.push((ENV_COPY_IF_NOT_EXISTS, header));
        let options = S3Options::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(options.copy_if_not_exists, header);
    }
}
