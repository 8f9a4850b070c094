//! Queue error types.

use thiserror::Error;

use skyfeed_core::{DeadLetterRecord, IngestError};

#[derive(Debug, Error)]
pub enum QueueError {
    /// Retries were exhausted (or the failure was permanent) and the record
    /// was handed to the dead-letter sink.
    #[error("dead-lettered after {} attempt(s): {}", .0.attempt_count, .0.error)]
    DeadLettered(Box<DeadLetterRecord>),

    /// The dead-letter sink itself failed. The original failure is kept.
    #[error("dead-letter sink failed ({sink}) while handling: {original}")]
    Sink { sink: String, original: String },

    /// A consumer rejected the whole batch; it will be redelivered.
    #[error("consumer error: {0}")]
    Consumer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl QueueError {
    pub fn dead_letter(&self) -> Option<&DeadLetterRecord> {
        match self {
            Self::DeadLettered(record) => Some(record),
            _ => None,
        }
    }
}

impl From<QueueError> for IngestError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::DeadLettered(record) => IngestError::Permanent(record.error),
            other => IngestError::Transient(other.to_string()),
        }
    }
}
