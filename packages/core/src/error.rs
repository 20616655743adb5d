//! Error types for queue operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors surfaced by the queue core.
///
/// Command failures are not errors: they are recorded on the job row and
/// drive the retry state machine. This enum covers caller mistakes and
/// storage failures only.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job command must not be empty")]
    EmptyCommand,

    #[error("job '{0}' already exists")]
    DuplicateJob(String),

    #[error("dead letter entry '{0}' not found")]
    DlqEntryNotFound(String),

    #[error("invalid run_at timestamp '{0}' (expected RFC 3339)")]
    InvalidRunAt(String),

    #[error("corrupt dead letter payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
