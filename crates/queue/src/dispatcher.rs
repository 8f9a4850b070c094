//! Change dispatcher: feed partitions → filtered micro-batches → consumer.
//!
//! One worker per partition keeps per-key order. A worker reads from the
//! committed cursor, drops `REMOVE` events and items already past their
//! expiry, accumulates the rest in a [`MicroBatcher`] and hands each flushed
//! batch to the [`ChangeConsumer`]. The cursor is committed only after the
//! consumer acknowledges; on error the worker rewinds to the committed
//! position so the batch is delivered again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use skyfeed_core::config::DispatchConfig;
use skyfeed_core::ChangeEvent;
use skyfeed_storage::ChangeFeed;

use crate::batcher::MicroBatcher;
use crate::consumer::{BatchReport, ChangeConsumer};
use crate::error::QueueError;

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub batch_size: usize,
    pub batch_window: Duration,
    /// Pause before redelivering a batch the consumer rejected.
    pub redelivery_backoff: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl DispatcherSettings {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_window: Duration::from_secs(config.batch_window_secs),
            redelivery_backoff: Duration::from_secs(5),
        }
    }
}

/// Whether an event should reach the consumer at `now`.
pub fn is_deliverable(event: &ChangeEvent, now: DateTime<Utc>) -> bool {
    event.is_forwardable() && !event.item.is_expired_at(now)
}

#[derive(Clone)]
pub struct ChangeDispatcher {
    feed: Arc<dyn ChangeFeed>,
    consumer: Arc<dyn ChangeConsumer>,
    settings: DispatcherSettings,
}

impl ChangeDispatcher {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        consumer: Arc<dyn ChangeConsumer>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            feed,
            consumer,
            settings,
        }
    }

    /// Run until `shutdown` flips to `true`, spawning a worker for every
    /// partition as it appears.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            consumer = self.consumer.name(),
            batch_size = self.settings.batch_size,
            window_secs = self.settings.batch_window.as_secs(),
            "change dispatcher started"
        );
        let mut changes = self.feed.subscribe();
        let mut workers: HashMap<String, JoinHandle<()>> = HashMap::new();

        loop {
            changes.borrow_and_update();
            for partition in self.feed.partitions().await {
                if !workers.contains_key(&partition) {
                    debug!(partition = %partition, "spawning partition worker");
                    let worker = self.clone();
                    let rx = shutdown.clone();
                    let name = partition.clone();
                    workers.insert(
                        partition,
                        tokio::spawn(async move { worker.partition_loop(name, rx).await }),
                    );
                }
            }

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                res = changes.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => {}
            }
        }

        for (partition, handle) in workers {
            if let Err(e) = handle.await {
                error!(partition = %partition, error = %e, "partition worker panicked");
            }
        }
        info!("change dispatcher stopped");
    }

    /// Deliver everything currently in the feed, ignoring the batch window.
    ///
    /// Stops at the first consumer error, leaving that batch uncommitted.
    pub async fn drain(&self) -> Result<BatchReport, QueueError> {
        let mut total = BatchReport::default();
        for partition in self.feed.partitions().await {
            loop {
                let cursor = self.feed.committed(&partition).await;
                let events = self
                    .feed
                    .read(&partition, cursor, self.settings.batch_size)
                    .await;
                let Some(last) = events.last() else { break };
                let next = last.sequence + 1;

                let batch = filter_batch(&partition, events, Utc::now());
                if !batch.is_empty() {
                    let report = self.consumer.consume(batch).await?;
                    total.merge(&report);
                }
                self.feed.commit(&partition, next).await;
            }
        }
        Ok(total)
    }

    async fn partition_loop(self, partition: String, mut shutdown: watch::Receiver<bool>) {
        let mut changes = self.feed.subscribe();
        let mut batcher: MicroBatcher<ChangeEvent> =
            MicroBatcher::new(self.settings.batch_size, self.settings.batch_window);
        let mut cursor = self.feed.committed(&partition).await;

        loop {
            changes.borrow_and_update();
            let stopping = *shutdown.borrow();

            let capacity = batcher.capacity_left();
            if capacity > 0 {
                let events = self.feed.read(&partition, cursor, capacity).await;
                if let Some(last) = events.last() {
                    cursor = last.sequence + 1;
                    let had_pending = !batcher.is_empty();
                    batcher.push(filter_batch(&partition, events, Utc::now()));
                    if !had_pending && batcher.is_empty() {
                        // Everything read was filtered out.
                        self.feed.commit(&partition, cursor).await;
                        continue;
                    }
                }
            }

            if batcher.should_flush() || (stopping && !batcher.is_empty()) {
                let batch = batcher.flush();
                let size = batch.len();
                match self.consumer.consume(batch).await {
                    Ok(report) => {
                        self.feed.commit(&partition, cursor).await;
                        debug!(partition = %partition, size, %report, "batch acknowledged");
                    }
                    Err(e) => {
                        cursor = self.feed.committed(&partition).await;
                        warn!(
                            partition = %partition,
                            size,
                            error = %e,
                            "consumer rejected batch, will redeliver"
                        );
                        if stopping {
                            break;
                        }
                        tokio::time::sleep(self.settings.redelivery_backoff).await;
                    }
                }
                continue;
            }

            if stopping {
                break;
            }

            let window = batcher.remaining();
            tokio::select! {
                res = changes.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = sleep_or_pending(window) => {}
                _ = shutdown.changed() => {}
            }
        }
        debug!(partition = %partition, "partition worker stopped");
    }
}

/// Drop events that must not reach the consumer.
fn filter_batch(partition: &str, events: Vec<ChangeEvent>, now: DateTime<Utc>) -> Vec<ChangeEvent> {
    events
        .into_iter()
        .filter(|event| {
            let keep = is_deliverable(event, now);
            if !keep {
                debug!(
                    partition,
                    key = %event.key(),
                    op = ?event.op,
                    sequence = event.sequence,
                    "change event filtered"
                );
            }
            keep
        })
        .collect()
}

async fn sleep_or_pending(window: Option<Duration>) {
    match window {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use skyfeed_core::{ChangeOp, Item};
    use skyfeed_storage::LogFeed;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Vec<ChangeEvent>>>,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl ChangeConsumer for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn consume(&self, batch: Vec<ChangeEvent>) -> Result<BatchReport, QueueError> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(QueueError::Consumer("index unavailable".into()));
            }
            let delivered = batch.len();
            self.batches.lock().await.push(batch);
            Ok(BatchReport { delivered, applied: delivered, ..Default::default() })
        }
    }

    fn item(key: &str) -> Item {
        Item::new("space", key, "tle", Utc::now(), serde_json::json!({}))
    }

    fn settings(batch_size: usize, window_secs: u64) -> DispatcherSettings {
        DispatcherSettings {
            batch_size,
            batch_window: Duration::from_secs(window_secs),
            redelivery_backoff: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn drain_filters_removes_and_expired() {
        let feed = Arc::new(LogFeed::new());
        feed.append(ChangeOp::Insert, item("a")).await;
        feed.append(ChangeOp::Modify, item("a")).await;
        feed.append(ChangeOp::Remove, item("a")).await;
        feed.append(ChangeOp::Insert, item("old").with_expiry(1)).await;

        let recorder = Arc::new(Recorder::default());
        let dispatcher = ChangeDispatcher::new(feed.clone(), recorder.clone(), settings(10, 30));
        let report = dispatcher.drain().await.unwrap();

        assert_eq!(report.delivered, 2);
        let batches = recorder.batches.lock().await;
        let ops: Vec<ChangeOp> = batches.iter().flatten().map(|e| e.op).collect();
        assert_eq!(ops, vec![ChangeOp::Insert, ChangeOp::Modify]);
        assert_eq!(feed.backlog().await, 0);
    }

    #[tokio::test]
    async fn drain_leaves_rejected_batch_uncommitted() {
        let feed = Arc::new(LogFeed::new());
        feed.append(ChangeOp::Insert, item("a")).await;

        let recorder = Arc::new(Recorder::default());
        recorder.fail_first.store(1, Ordering::SeqCst);
        let dispatcher = ChangeDispatcher::new(feed.clone(), recorder.clone(), settings(10, 30));

        assert!(dispatcher.drain().await.is_err());
        assert_eq!(feed.committed("space").await, 0);

        let report = dispatcher.drain().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(feed.committed("space").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_flushes_on_size_and_window() {
        let feed = Arc::new(LogFeed::new());
        let recorder = Arc::new(Recorder::default());
        let dispatcher = ChangeDispatcher::new(feed.clone(), recorder.clone(), settings(2, 30));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(rx));

        for key in ["a", "b", "c"] {
            feed.append(ChangeOp::Insert, item(key)).await;
        }
        // Size threshold: first two go out without waiting for the window.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.batches.lock().await.len(), 1);

        // The third flushes once the window closes.
        tokio::time::sleep(Duration::from_secs(31)).await;
        {
            let batches = recorder.batches.lock().await;
            assert_eq!(batches.len(), 2);
            assert_eq!(batches[1].len(), 1);
        }
        assert_eq!(feed.committed("space").await, 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_redelivers_after_consumer_error() {
        let feed = Arc::new(LogFeed::new());
        let recorder = Arc::new(Recorder::default());
        recorder.fail_first.store(1, Ordering::SeqCst);
        let dispatcher = ChangeDispatcher::new(feed.clone(), recorder.clone(), settings(1, 30));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(rx));

        feed.append(ChangeOp::Insert, item("a")).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let batches = recorder.batches.lock().await.clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].sequence, 0);
        assert_eq!(feed.committed("space").await, 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_batch() {
        let feed = Arc::new(LogFeed::new());
        let recorder = Arc::new(Recorder::default());
        let dispatcher = ChangeDispatcher::new(feed.clone(), recorder.clone(), settings(10, 300));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(rx));

        feed.append(ChangeOp::Insert, item("a")).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(recorder.batches.lock().await.is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(recorder.batches.lock().await.len(), 1);
        assert_eq!(feed.committed("space").await, 1);
    }
}
