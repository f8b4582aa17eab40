//! Remote queue-access profiles.
//!
//! A profile names an S3-compatible endpoint plus credentials. Datasets and
//! `ProcessS3Objects` dispatchers reference profiles by name; resolution
//! happens at compile time so a bad reference fails the compile instead of
//! the run.
//!
//! ```yaml
//! myremote:
//!   type: s3
//!   endpoint: https://s3.us-east-1.amazonaws.com
//!   accessKeyId: AKIA...
//!   secretAccessKey: ...
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use taskpail_core::{QueueSpec, RunContext};

use crate::error::CompileError;

/// Endpoint placeholder standing for the run's own queue service.
pub const RUN_QUEUE_ENDPOINT: &str = "$TASKPAIL_QUEUE_ENDPOINT";

/// One remote profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProfile {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
}

/// Registry of named profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueProfiles(BTreeMap<String, QueueProfile>);

impl QueueProfiles {
    /// Parse a registry from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, CompileError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a registry from a file.
    pub fn load(path: &Path) -> Result<Self, CompileError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, name: impl Into<String>, profile: QueueProfile) {
        self.0.insert(name.into(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&QueueProfile> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve and validate a profile into queue coordinates.
    ///
    /// `resource` names the referencing resource for error messages.
    pub fn resolve(
        &self,
        name: &str,
        resource: &str,
        run: &RunContext,
    ) -> Result<QueueSpec, CompileError> {
        let invalid = |reason: &str| CompileError::InvalidQueueProfile {
            profile: name.to_string(),
            resource: resource.to_string(),
            reason: reason.to_string(),
        };

        let profile = self.get(name).ok_or_else(|| invalid("no such profile"))?;
        if profile.kind != "s3" {
            return Err(invalid(&format!("unsupported type '{}'", profile.kind)));
        }
        if profile.endpoint.is_empty() {
            return Err(invalid("missing endpoint"));
        }
        if profile.access_key_id.is_empty() || profile.secret_access_key.is_empty() {
            return Err(invalid("missing credentials"));
        }

        let endpoint = if profile.endpoint == RUN_QUEUE_ENDPOINT {
            format!("http://{}-queue:{}", run.run_name, run.queue_port)
        } else {
            profile.endpoint.clone()
        };

        Ok(QueueSpec {
            auto: false,
            bucket: run.bucket.clone(),
            endpoint,
            port: run.queue_port,
            access_key: profile.access_key_id.clone(),
            secret_key: profile.secret_access_key.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILES: &str = r#"
good:
  type: s3
  endpoint: https://s3.example.com
  accessKeyId: AK
  secretAccessKey: SK
internal:
  type: s3
  endpoint: $TASKPAIL_QUEUE_ENDPOINT
  accessKeyId: AK
  secretAccessKey: SK
nokeys:
  type: s3
  endpoint: https://s3.example.com
ftp:
  type: ftp
  endpoint: ftp://example.com
  accessKeyId: AK
  secretAccessKey: SK
"#;

    fn run() -> RunContext {
        RunContext::new("r1", "bucket").with_queue_port(9100)
    }

    #[test]
    fn test_resolve_valid() {
        let profiles = QueueProfiles::from_yaml(PROFILES).unwrap();
        assert_eq!(profiles.len(), 4);

        let spec = profiles.resolve("good", "Application/a", &run()).unwrap();
        assert_eq!(spec.endpoint, "https://s3.example.com");
        assert_eq!(spec.access_key, "AK");
        assert_eq!(spec.bucket, "bucket");
    }

    #[test]
    fn test_resolve_internal_endpoint() {
        let profiles = QueueProfiles::from_yaml(PROFILES).unwrap();
        let spec = profiles.resolve("internal", "Application/a", &run()).unwrap();
        assert_eq!(spec.endpoint, "http://r1-queue:9100");
    }

    #[test]
    fn test_resolve_invalid() {
        let profiles = QueueProfiles::from_yaml(PROFILES).unwrap();
        for name in ["missing", "nokeys", "ftp"] {
            let err = profiles.resolve(name, "Application/a", &run()).unwrap_err();
            assert!(
                matches!(err, CompileError::InvalidQueueProfile { ref profile, .. } if profile == name),
                "unexpected error for {}: {}",
                name,
                err
            );
        }
    }

    #[test]
    fn test_empty_registry() {
        assert!(QueueProfiles::from_yaml("  \n").unwrap().is_empty());
    }
}
