use std::io;

use ddc_types::NamespaceId;

use crate::event::LogCursor;

/// Errors produced by the replication log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The requested cursor predates retained history or names an event the
    /// log does not hold. Callers fall back to a snapshot.
    #[error("incremental log not available for namespace {namespace} from {}", describe(.cursor))]
    IncrementalLogNotAvailable {
        namespace: NamespaceId,
        cursor: Option<LogCursor>,
    },

    /// A log bucket name that is not a `YYYYMMDDTHHMMSS` timestamp.
    #[error("invalid log bucket: {0}")]
    InvalidBucket(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Checkpoint offset is beyond the current WAL write position.
    #[error("checkpoint offset {requested} exceeds current write position {current}")]
    InvalidCheckpoint { requested: u64, current: u64 },
}

fn describe(cursor: &Option<LogCursor>) -> String {
    match cursor {
        Some(c) => c.to_string(),
        None => "the beginning".into(),
    }
}

/// Convenience alias used throughout the log crate.
pub type LogResult<T> = std::result::Result<T, LogError>;
