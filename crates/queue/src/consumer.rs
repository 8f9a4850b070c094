//! Change consumer trait and batch report.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use skyfeed_core::ChangeEvent;

use crate::error::QueueError;

/// Per-batch outcome reported back to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Events handed to the consumer.
    pub delivered: usize,
    /// Events that produced a write downstream.
    pub applied: usize,
    /// Events dropped as stale, expired or superseded within the batch.
    pub skipped: usize,
    /// Events whose processing ended in the dead-letter sink.
    pub dead_lettered: usize,
}

impl BatchReport {
    pub fn merge(&mut self, other: &BatchReport) {
        self.delivered += other.delivered;
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.dead_lettered += other.dead_lettered;
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delivered={} applied={} skipped={} dead_lettered={}",
            self.delivered, self.applied, self.skipped, self.dead_lettered
        )
    }
}

/// Downstream side of the change dispatcher.
///
/// `consume` returning `Ok` acknowledges the whole batch; per-event failures
/// are the consumer's job to retry or dead-letter before returning. Returning
/// `Err` leaves the batch uncommitted and it is delivered again.
#[async_trait]
pub trait ChangeConsumer: Send + Sync {
    fn name(&self) -> &str;

    async fn consume(&self, batch: Vec<ChangeEvent>) -> Result<BatchReport, QueueError>;
}
