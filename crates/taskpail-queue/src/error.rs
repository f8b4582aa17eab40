//! Queue errors.

use taskpail_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The bucket does not exist and cannot be created by this provider.
    #[error("bucket '{0}' does not exist")]
    BucketMissing(String),

    /// A remote path did not have the `bucket/prefix` shape.
    #[error("invalid remote path '{0}': expected bucket/path")]
    InvalidPath(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,
}
