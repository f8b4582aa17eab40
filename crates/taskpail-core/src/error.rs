//! Core domain errors.

use thiserror::Error;

/// Core domain errors for taskpail.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A topology breaks one of its structural invariants.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// A queue key does not live under the expected run prefix.
    #[error("Key '{key}' is not under prefix '{prefix}'")]
    ForeignKey { key: String, prefix: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
