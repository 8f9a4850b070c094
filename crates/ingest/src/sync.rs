//! Embedding sync consumer: change events → text + vector → search index.
//!
//! A batch is first coalesced to the newest snapshot per key, then every
//! remaining item is synced concurrently (bounded by a semaphore). Each item
//! runs under its own [`RetryPolicy`]; an item that exhausts it is
//! dead-lettered and the rest of the batch carries on. The batch is reported
//! back only once every item is resolved.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use skyfeed_core::{ChangeEvent, FailureContext, IngestError, Item, ItemKey};
use skyfeed_queue::{BatchReport, ChangeConsumer, DeadLetterSink, QueueError, RetryPolicy};

use crate::embedding::{item_to_text, Embedder};
use crate::index::{IndexDocument, IndexWrite, SearchIndex};

/// Resolution of one item in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Indexed,
    /// The index already holds this or a newer snapshot.
    SkippedStale,
    SkippedExpired,
    /// A newer snapshot of the same key was in the same batch.
    Superseded,
    /// Not an insert or modify.
    Ignored,
    DeadLettered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResult {
    pub key: ItemKey,
    pub sequence: u64,
    pub status: SyncStatus,
}

pub struct EmbeddingSyncConsumer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SearchIndex>,
    retry: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterSink>,
    parallelism: usize,
}

impl EmbeddingSyncConsumer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SearchIndex>,
        retry: RetryPolicy,
        dead_letters: Arc<dyn DeadLetterSink>,
        parallelism: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            retry,
            dead_letters,
            parallelism: parallelism.max(1),
        }
    }

    /// Sync one batch, returning one result per delivered event.
    ///
    /// Fails only when a dead-letter record could not be written; in that
    /// case nothing about the batch may be acknowledged.
    pub async fn sync_batch(&self, batch: Vec<ChangeEvent>) -> Result<Vec<ItemResult>, QueueError> {
        let now = Utc::now();
        let (work, mut results) = plan(batch, now);

        let semaphore = Semaphore::new(self.parallelism);
        let futures: Vec<_> = work
            .iter()
            .map(|event| self.sync_bounded(&semaphore, event))
            .collect();

        for outcome in join_all(futures).await {
            results.push(outcome?);
        }
        results.sort_by_key(|r| r.sequence);
        Ok(results)
    }

    async fn sync_bounded(
        &self,
        semaphore: &Semaphore,
        event: &ChangeEvent,
    ) -> Result<ItemResult, QueueError> {
        let _permit = semaphore.acquire().await.ok();
        let status = self.sync_with_retry(event).await?;
        Ok(ItemResult {
            key: event.key(),
            sequence: event.sequence,
            status,
        })
    }

    async fn sync_with_retry(&self, event: &ChangeEvent) -> Result<SyncStatus, QueueError> {
        let item = &event.item;
        let context = FailureContext::index_sync(
            &item.source,
            &item.sort_key,
            json!({
                "op": event.op,
                "partition": event.partition,
                "sequence": event.sequence,
                "timestamp": item.timestamp,
            }),
        );

        let outcome = self
            .retry
            .run(self.dead_letters.as_ref(), context, move |_| self.sync_item(item))
            .await;

        match outcome {
            Ok(IndexWrite::Written) => Ok(SyncStatus::Indexed),
            Ok(IndexWrite::Stale) => Ok(SyncStatus::SkippedStale),
            Err(QueueError::DeadLettered(_)) => Ok(SyncStatus::DeadLettered),
            Err(e) => Err(e),
        }
    }

    async fn sync_item(&self, item: &Item) -> Result<IndexWrite, IngestError> {
        // Skip the embedding call when the index is already at least as fresh.
        if let Some(existing) = self.index.get(&item.source, &item.sort_key).await? {
            if existing.timestamp >= item.timestamp {
                debug!(key = %item.key(), "index already fresh, skipping");
                return Ok(IndexWrite::Stale);
            }
        }

        let text = item_to_text(item);
        let embedding = self.embedder.embed(&text).await?;
        let write = self
            .index
            .upsert(IndexDocument::from_item(item, text, embedding))
            .await?;
        Ok(write)
    }
}

/// Split a batch into events to sync and events already resolved.
///
/// Keeps the newest snapshot per key (later sequence breaks timestamp ties)
/// and drops removals and expired snapshots.
fn plan(batch: Vec<ChangeEvent>, now: DateTime<Utc>) -> (Vec<ChangeEvent>, Vec<ItemResult>) {
    let mut resolved = Vec::new();
    let mut newest: HashMap<ItemKey, ChangeEvent> = HashMap::new();

    for event in batch {
        let status = if !event.is_forwardable() {
            Some(SyncStatus::Ignored)
        } else if event.item.is_expired_at(now) {
            Some(SyncStatus::SkippedExpired)
        } else {
            None
        };
        if let Some(status) = status {
            resolved.push(ItemResult {
                key: event.key(),
                sequence: event.sequence,
                status,
            });
            continue;
        }

        let key = event.key();
        let replaced = match newest.remove(&key) {
            Some(current) if is_newer(&current, &event) => {
                newest.insert(key, current);
                event
            }
            Some(current) => {
                newest.insert(key, event);
                current
            }
            None => {
                newest.insert(key, event);
                continue;
            }
        };
        resolved.push(ItemResult {
            key: replaced.key(),
            sequence: replaced.sequence,
            status: SyncStatus::Superseded,
        });
    }

    let mut work: Vec<ChangeEvent> = newest.into_values().collect();
    work.sort_by_key(|e| e.sequence);
    (work, resolved)
}

/// Whether `a` is a fresher snapshot than `b`.
fn is_newer(a: &ChangeEvent, b: &ChangeEvent) -> bool {
    (a.item.timestamp, a.sequence) > (b.item.timestamp, b.sequence)
}

fn report(results: &[ItemResult]) -> BatchReport {
    let mut report = BatchReport {
        delivered: results.len(),
        ..Default::default()
    };
    for result in results {
        match result.status {
            SyncStatus::Indexed => report.applied += 1,
            SyncStatus::DeadLettered => report.dead_lettered += 1,
            _ => report.skipped += 1,
        }
    }
    report
}

#[async_trait]
impl ChangeConsumer for EmbeddingSyncConsumer {
    fn name(&self) -> &str {
        "embedding-sync"
    }

    async fn consume(&self, batch: Vec<ChangeEvent>) -> Result<BatchReport, QueueError> {
        let results = self.sync_batch(batch).await?;
        let report = report(&results);
        if report.dead_lettered > 0 {
            info!(%report, "batch synced with dead-lettered items");
        } else {
            debug!(%report, "batch synced");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use skyfeed_core::ChangeOp;

    fn event(key: &str, at: i64, seq: u64, op: ChangeOp) -> ChangeEvent {
        ChangeEvent {
            op,
            item: Item::new(
                "space",
                key,
                "tle",
                Utc.timestamp_opt(1_700_000_000 + at, 0).unwrap(),
                json!({}),
            ),
            partition: "space".into(),
            sequence: seq,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn plan_keeps_newest_per_key() {
        let batch = vec![
            event("a", 1, 0, ChangeOp::Insert),
            event("a", 3, 1, ChangeOp::Modify),
            event("a", 2, 2, ChangeOp::Modify),
            event("b", 1, 3, ChangeOp::Insert),
            event("b", 1, 4, ChangeOp::Remove),
        ];
        let (work, resolved) = plan(batch, Utc::now());

        let kept: Vec<u64> = work.iter().map(|e| e.sequence).collect();
        assert_eq!(kept, vec![1, 3]);

        let mut statuses: Vec<(u64, SyncStatus)> =
            resolved.iter().map(|r| (r.sequence, r.status)).collect();
        statuses.sort_by_key(|(s, _)| *s);
        assert_eq!(
            statuses,
            vec![
                (0, SyncStatus::Superseded),
                (2, SyncStatus::Superseded),
                (4, SyncStatus::Ignored),
            ]
        );
    }

    #[test]
    fn plan_drops_expired() {
        let mut expired = event("x", 1, 0, ChangeOp::Insert);
        expired.item.expiry_epoch = Some(1);
        let (work, resolved) = plan(vec![expired], Utc::now());
        assert!(work.is_empty());
        assert_eq!(resolved[0].status, SyncStatus::SkippedExpired);
    }

    #[test]
    fn equal_timestamps_prefer_later_sequence() {
        assert!(is_newer(
            &event("a", 1, 5, ChangeOp::Modify),
            &event("a", 1, 4, ChangeOp::Modify)
        ));
    }
}
