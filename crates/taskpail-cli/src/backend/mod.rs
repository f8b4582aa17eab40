//! Deployment backends.
//!
//! A backend applies and deletes a compiled topology and streams what the
//! deployed run is doing.

use async_trait::async_trait;
use taskpail_core::{Llir, RunContext};
use taskpail_queue::QueueClient;
use taskpail_status::Streamer;
use thiserror::Error;

pub mod kubernetes;
pub mod manifest;
pub mod print;

/// Errors raised by deployment backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unsupported target '{0}'")]
    UnsupportedTarget(String),

    #[error("failed to render manifests: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("{command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A platform a run can be deployed to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Create every resource of the topology, in order.
    async fn apply(&self, llir: &Llir, namespace: &str, context: &str) -> Result<(), BackendError>;

    /// Remove every resource of the topology, in reverse order.
    async fn delete(&self, llir: &Llir, namespace: &str, context: &str) -> Result<(), BackendError>;

    /// Streams describing a deployed run.
    fn streamer(&self, run: &RunContext, namespace: &str, client: QueueClient) -> Box<dyn Streamer>;
}

/// The backend for a target name.
pub fn new(target: &str) -> Result<Box<dyn Backend>, BackendError> {
    match target {
        "kubernetes" | "k8s" => Ok(Box::new(kubernetes::Kubernetes::new())),
        "print" => Ok(Box::new(print::Print)),
        other => Err(BackendError::UnsupportedTarget(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fails_fast_on_unknown_target() {
        assert!(new("kubernetes").is_ok());
        assert!(new("print").is_ok());
        match new("ibmcloud") {
            Err(BackendError::UnsupportedTarget(t)) => assert_eq!(t, "ibmcloud"),
            _ => panic!("expected UnsupportedTarget"),
        }
    }
}
