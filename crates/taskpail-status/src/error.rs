//! Status errors.

use taskpail_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend could not open a stream.
    #[error("stream error: {0}")]
    Stream(String),

    /// The backend does not provide this stream.
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}
