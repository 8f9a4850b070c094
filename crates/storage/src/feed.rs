//! Partitioned mutation feed.
//!
//! Every successful store mutation is appended to the log of its partition
//! (the item's source). Consumers read from a cursor and commit the position
//! after processing; anything not committed is read again, which makes
//! delivery at-least-once. Committed events are trimmed from memory.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex};

use skyfeed_core::{ChangeEvent, ChangeOp, Item};

/// Consumer side of the mutation feed.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Partitions that have ever received an event.
    async fn partitions(&self) -> Vec<String>;

    /// Read up to `max` events of `partition` whose sequence is `>= from`.
    async fn read(&self, partition: &str, from: u64, max: usize) -> Vec<ChangeEvent>;

    /// Acknowledge every event of `partition` with sequence `< upto`.
    async fn commit(&self, partition: &str, upto: u64);

    /// First sequence not yet acknowledged.
    async fn committed(&self, partition: &str) -> u64;

    /// Receiver that changes whenever any partition gets a new event.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

#[derive(Debug, Default)]
struct PartitionLog {
    next_sequence: u64,
    committed: u64,
    /// Uncommitted events, ordered by sequence.
    events: VecDeque<ChangeEvent>,
}

/// In-memory append-only log, one ordered queue per partition.
pub struct LogFeed {
    partitions: Mutex<HashMap<String, PartitionLog>>,
    version: watch::Sender<u64>,
}

impl LogFeed {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            partitions: Mutex::new(HashMap::new()),
            version,
        }
    }

    /// Append a mutation and wake subscribers. Returns the recorded event.
    pub async fn append(&self, op: ChangeOp, item: Item) -> ChangeEvent {
        let partition = item.source.clone();
        let event = {
            let mut partitions = self.partitions.lock().await;
            let log = partitions.entry(partition.clone()).or_default();
            let event = ChangeEvent {
                op,
                item,
                partition,
                sequence: log.next_sequence,
                recorded_at: Utc::now(),
            };
            log.next_sequence += 1;
            log.events.push_back(event.clone());
            event
        };
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        event
    }

    /// Number of uncommitted events across all partitions.
    pub async fn backlog(&self) -> usize {
        self.partitions
            .lock()
            .await
            .values()
            .map(|log| log.events.len())
            .sum()
    }
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for LogFeed {
    async fn partitions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.partitions.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn read(&self, partition: &str, from: u64, max: usize) -> Vec<ChangeEvent> {
        let partitions = self.partitions.lock().await;
        match partitions.get(partition) {
            Some(log) => log
                .events
                .iter()
                .filter(|e| e.sequence >= from)
                .take(max)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    async fn commit(&self, partition: &str, upto: u64) {
        let mut partitions = self.partitions.lock().await;
        if let Some(log) = partitions.get_mut(partition) {
            let upto = upto.min(log.next_sequence);
            if upto > log.committed {
                log.committed = upto;
                while log.events.front().is_some_and(|e| e.sequence < upto) {
                    log.events.pop_front();
                }
            }
        }
    }

    async fn committed(&self, partition: &str) -> u64 {
        self.partitions
            .lock()
            .await
            .get(partition)
            .map(|log| log.committed)
            .unwrap_or(0)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source: &str, key: &str) -> Item {
        Item::new(source, key, "tle", Utc::now(), serde_json::json!({}))
    }

    #[tokio::test]
    async fn sequences_are_per_partition() {
        let feed = LogFeed::new();
        let a0 = feed.append(ChangeOp::Insert, item("a", "1")).await;
        let b0 = feed.append(ChangeOp::Insert, item("b", "1")).await;
        let a1 = feed.append(ChangeOp::Modify, item("a", "1")).await;

        assert_eq!((a0.sequence, a1.sequence, b0.sequence), (0, 1, 0));
        assert_eq!(feed.partitions().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn uncommitted_events_are_redelivered() {
        let feed = LogFeed::new();
        for i in 0..3 {
            feed.append(ChangeOp::Insert, item("a", &i.to_string())).await;
        }

        let first = feed.read("a", 0, 10).await;
        assert_eq!(first.len(), 3);

        // Nothing committed: reading from the committed cursor yields the same events.
        let again = feed.read("a", feed.committed("a").await, 10).await;
        assert_eq!(again, first);

        feed.commit("a", 2).await;
        assert_eq!(feed.committed("a").await, 2);
        let rest = feed.read("a", 2, 10).await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].sequence, 2);
        assert_eq!(feed.backlog().await, 1);
    }

    #[tokio::test]
    async fn commit_never_moves_backwards_or_past_the_end() {
        let feed = LogFeed::new();
        feed.append(ChangeOp::Insert, item("a", "1")).await;
        feed.commit("a", 100).await;
        assert_eq!(feed.committed("a").await, 1);
        feed.commit("a", 0).await;
        assert_eq!(feed.committed("a").await, 1);
    }

    #[tokio::test]
    async fn read_respects_max() {
        let feed = LogFeed::new();
        for i in 0..5 {
            feed.append(ChangeOp::Insert, item("a", &i.to_string())).await;
        }
        assert_eq!(feed.read("a", 0, 2).await.len(), 2);
        assert!(feed.read("missing", 0, 2).await.is_empty());
    }

    #[tokio::test]
    async fn subscribers_observe_appends() {
        let feed = LogFeed::new();
        let mut rx = feed.subscribe();
        feed.append(ChangeOp::Insert, item("a", "1")).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
    }
}
