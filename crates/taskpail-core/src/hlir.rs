//! High-level model: the typed form of user-authored declarative resources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Environment variables as declared by a resource.
pub type Env = BTreeMap<String, String>;

/// Resource metadata shared by every kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Coarse sizing hint shared by applications and pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TShirtSize {
    #[default]
    Auto,
    Xxs,
    Xs,
    Sm,
    Md,
    Lg,
    Xl,
}

/// A user program: either the dispatcher of a run or the code workers execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default)]
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: ApplicationSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// `worker` for task processors; anything else is a dispatcher.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub env: Env,
    #[serde(default)]
    pub min_size: Option<TShirtSize>,
    #[serde(default)]
    pub needs: Vec<Needs>,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

impl Application {
    /// Role value that marks a task processor.
    pub const WORKER_ROLE: &'static str = "worker";

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns true if this application processes tasks.
    pub fn is_worker(&self) -> bool {
        self.spec.role.as_deref() == Some(Self::WORKER_ROLE)
    }
}

/// A runtime dependency resolved before the application command runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Needs {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Inline requirements file (e.g. a pip requirements.txt).
    #[serde(default)]
    pub requirements: String,
}

/// A named dataset made available to an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub name: String,
    #[serde(default)]
    pub s3: Option<S3Dataset>,
}

impl Dataset {
    /// Remote profile and copy-in instructions, when both are declared.
    pub fn copy_in(&self) -> Option<(&str, &CopyIn)> {
        let s3 = self.s3.as_ref()?;
        let remote = s3.rclone.as_ref()?.remote_name.as_str();
        let copy_in = s3.copy_in.as_ref()?;
        if remote.is_empty() || copy_in.path.is_empty() {
            return None;
        }
        Some((remote, copy_in))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Dataset {
    #[serde(default)]
    pub rclone: Option<RemoteRef>,
    #[serde(default)]
    pub copy_in: Option<CopyIn>,
}

/// Reference to a named remote queue-access profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRef {
    pub remote_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyIn {
    /// `bucket/path/to/object` on the remote.
    pub path: String,
    /// Seconds to wait before downloading.
    #[serde(default)]
    pub delay: u64,
}

/// A sized group of worker processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPool {
    #[serde(default)]
    pub api_version: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: WorkerPoolSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolSpec {
    #[serde(default)]
    pub workers: WorkerCount,
    /// Application run by the pool's workers.
    #[serde(default)]
    pub application: Option<AppRef>,
    #[serde(default)]
    pub env: Env,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCount {
    #[serde(default = "default_worker_count")]
    pub count: u32,
    #[serde(default)]
    pub size: Option<TShirtSize>,
}

impl Default for WorkerCount {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            size: None,
        }
    }
}

fn default_worker_count() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppRef {
    pub name: String,
}

impl WorkerPool {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Enqueue one task per value of an arithmetic sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSweep {
    #[serde(default)]
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: ParameterSweepSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSweepSpec {
    pub min: i64,
    pub max: i64,
    #[serde(default = "default_step")]
    pub step: i64,
    /// Seconds between enqueues.
    #[serde(default)]
    pub interval: u64,
    /// Wait for each task to finish before enqueueing the next.
    #[serde(default)]
    pub wait: bool,
}

fn default_step() -> i64 {
    1
}

impl ParameterSweepSpec {
    /// The swept values, inclusive of `max`.
    pub fn values(&self) -> Vec<i64> {
        sweep_values(self.min, self.max, self.step)
    }
}

/// `min..=max` by `step`. A non-positive step yields `min` only; the sweep
/// stops short of overflowing `i64`.
pub fn sweep_values(min: i64, max: i64, step: i64) -> Vec<i64> {
    if step <= 0 {
        return vec![min];
    }
    let mut values = Vec::new();
    let mut next = Some(min);
    while let Some(v) = next.filter(|v| *v <= max) {
        values.push(v);
        next = v.checked_add(step);
    }
    values
}

/// Enqueue one task per object found under a remote bucket path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessS3Objects {
    #[serde(default)]
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: ProcessS3ObjectsSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessS3ObjectsSpec {
    /// `bucket/prefix` on the remote.
    pub path: String,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    pub rclone: RemoteRef,
}

fn default_repeat() -> u32 {
    1
}

/// The typed model of a whole spec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hlir {
    pub applications: Vec<Application>,
    pub worker_pools: Vec<WorkerPool>,
    pub parameter_sweeps: Vec<ParameterSweep>,
    pub process_s3_objects: Vec<ProcessS3Objects>,
    /// Resources passed through verbatim.
    pub others: Vec<serde_yaml::Value>,
}

impl Hlir {
    /// Returns true if no resource of any kind was recognized or retained.
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
            && self.worker_pools.is_empty()
            && self.parameter_sweeps.is_empty()
            && self.process_s3_objects.is_empty()
            && self.others.is_empty()
    }

    /// Find an application by name.
    pub fn application(&self, name: &str) -> Option<&Application> {
        self.applications.iter().find(|a| a.name() == name)
    }

    /// Applications with the worker role.
    pub fn worker_applications(&self) -> impl Iterator<Item = &Application> {
        self.applications.iter().filter(|a| a.is_worker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_values() {
        let spec = ParameterSweepSpec {
            min: 1,
            max: 7,
            step: 3,
            interval: 0,
            wait: false,
        };
        assert_eq!(spec.values(), vec![1, 4, 7]);

        let degenerate = ParameterSweepSpec { step: 0, ..spec };
        assert_eq!(degenerate.values(), vec![1]);
    }

    #[test]
    fn test_sweep_values_bounds() {
        assert_eq!(sweep_values(-1, 1, 1), vec![-1, 0, 1]);
        assert_eq!(sweep_values(3, 1, 1), Vec::<i64>::new());
        assert_eq!(sweep_values(i64::MAX - 1, i64::MAX, 1), vec![i64::MAX - 1, i64::MAX]);
        assert_eq!(sweep_values(i64::MAX - 2, i64::MAX, 5), vec![i64::MAX - 2]);
    }

    #[test]
    fn test_dataset_copy_in_requires_remote_and_path() {
        let mut ds = Dataset {
            name: "input".to_string(),
            s3: Some(S3Dataset {
                rclone: Some(RemoteRef {
                    remote_name: "r".to_string(),
                }),
                copy_in: Some(CopyIn {
                    path: "b/x.txt".to_string(),
                    delay: 0,
                }),
            }),
        };
        assert!(ds.copy_in().is_some());

        ds.s3.as_mut().unwrap().copy_in.as_mut().unwrap().path.clear();
        assert!(ds.copy_in().is_none());
    }

    #[test]
    fn test_is_worker() {
        let mut app = Application {
            api_version: String::new(),
            metadata: Metadata {
                name: "a".to_string(),
                ..Default::default()
            },
            spec: ApplicationSpec::default(),
        };
        assert!(!app.is_worker());
        app.spec.role = Some("worker".to_string());
        assert!(app.is_worker());
    }
}
