//! Dead-letter record: the terminal, operator-facing trace of a failed unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage where the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Adapter fetch of one page.
    Fetch,
    /// Store upsert of one item.
    StoreWrite,
    /// Embedding or index write of one item.
    IndexSync,
}

/// Identity of the unit of work being retried, carried into the dead-letter record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    pub source: String,
    pub sort_key: Option<String>,
    pub stage: FailureStage,
    /// Whatever triggered the work (schedule tick, cursor, change event).
    pub trigger_payload: serde_json::Value,
}

impl FailureContext {
    pub fn fetch(source: impl Into<String>, trigger_payload: serde_json::Value) -> Self {
        Self {
            source: source.into(),
            sort_key: None,
            stage: FailureStage::Fetch,
            trigger_payload,
        }
    }

    pub fn store_write(
        source: impl Into<String>,
        sort_key: impl Into<String>,
        trigger_payload: serde_json::Value,
    ) -> Self {
        Self {
            source: source.into(),
            sort_key: Some(sort_key.into()),
            stage: FailureStage::StoreWrite,
            trigger_payload,
        }
    }

    pub fn index_sync(
        source: impl Into<String>,
        sort_key: impl Into<String>,
        trigger_payload: serde_json::Value,
    ) -> Self {
        Self {
            source: source.into(),
            sort_key: Some(sort_key.into()),
            stage: FailureStage::IndexSync,
            trigger_payload,
        }
    }
}

/// Record appended to the dead-letter sink once retries are exhausted
/// or a permanent error short-circuits the retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub source: String,
    pub sort_key: Option<String>,
    pub stage: FailureStage,
    pub trigger_payload: serde_json::Value,
    pub error: String,
    /// Whether the final error was classified as retryable.
    pub retryable: bool,
    /// Total attempts made, including the first.
    pub attempt_count: u32,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        context: FailureContext,
        error: String,
        retryable: bool,
        attempt_count: u32,
        first_attempt_at: DateTime<Utc>,
        last_attempt_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: context.source,
            sort_key: context.sort_key,
            stage: context.stage,
            trigger_payload: context.trigger_payload,
            error,
            retryable,
            attempt_count,
            first_attempt_at,
            last_attempt_at,
            dead_lettered_at: Utc::now(),
        }
    }

    /// Attempts beyond the first one.
    pub fn retries_consumed(&self) -> u32 {
        self.attempt_count.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_consumed_excludes_first_attempt() {
        let now = Utc::now();
        let record = DeadLetterRecord::new(
            FailureContext::fetch("nist", serde_json::json!({ "cursor": null })),
            "permanent error: bad schema".into(),
            false,
            1,
            now,
            now,
        );
        assert_eq!(record.retries_consumed(), 0);
        assert_eq!(record.stage, FailureStage::Fetch);
        assert!(record.sort_key.is_none());
    }

    #[test]
    fn stage_serde() {
        let json = serde_json::to_string(&FailureStage::StoreWrite).unwrap();
        assert_eq!(json, r#""store_write""#);
    }
}
