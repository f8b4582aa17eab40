//! Compiler errors.

use taskpail_core::CoreError;
use thiserror::Error;

/// Errors that abort a compile.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A dataset or dispatcher references a remote profile that is missing or unusable.
    #[error("invalid or missing queue profile '{profile}' for {resource}: {reason}")]
    InvalidQueueProfile {
        profile: String,
        resource: String,
        reason: String,
    },

    /// A worker pool references an application that does not exist.
    #[error("WorkerPool '{pool}' references unknown application '{application}'")]
    UnknownApplication { pool: String, application: String },

    /// A worker pool does not say which application to run and none can be inferred.
    #[error("WorkerPool '{0}' does not name an application and there is no single worker application")]
    AmbiguousApplication(String),

    /// The lowered topology breaks a structural invariant.
    #[error("topology error: {0}")]
    Topology(#[from] CoreError),

    #[error("failed to read spec: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
