//! Core domain errors.

use thiserror::Error;

/// Core domain errors for taskproc.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid task configuration.
    #[error("Invalid task config '{name}': {reason}")]
    InvalidTaskConfig { name: String, reason: String },

    /// Status code not defined by the offer protocol.
    #[error("Unknown task state code: {0}")]
    UnknownTaskState(i32),
}
