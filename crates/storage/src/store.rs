use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use skyfeed_core::{ChangeOp, Item, ItemKey, KEY_SEPARATOR};

use crate::error::StoreError;
use crate::feed::LogFeed;

/// Result of an upsert. A stale write is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Modified,
    SkippedStale,
}

/// Inclusive timestamp range for secondary-index queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn all() -> Self {
        Self {
            from: DateTime::<Utc>::MIN_UTC,
            to: DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from <= ts && ts <= self.to
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Physically present items, including expired ones not yet reclaimed.
    pub item_count: usize,
    pub data_types: usize,
    pub sources: usize,
}

/// The only mutable shared state of the pipeline.
///
/// All writers go through [`ItemStore::upsert`], which resolves concurrent
/// writes for the same key by timestamp: the newest version wins and
/// replays of older or equal versions are no-ops.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn upsert(&self, item: Item) -> Result<UpsertOutcome, StoreError>;

    /// Live item for the key; expired items are reported as absent.
    async fn get(&self, source: &str, sort_key: &str) -> Result<Option<Item>, StoreError>;

    /// Live items of `data_type` in `range`, ascending by timestamp.
    async fn query(&self, data_type: &str, range: TimeRange) -> Result<Vec<Item>, StoreError>;

    /// Physically remove expired items, emitting `REMOVE` for each.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

type IndexEntry = (String, DateTime<Utc>, ItemKey);

#[derive(Default)]
struct StoreInner {
    items: HashMap<ItemKey, Item>,
    /// Secondary index: (data_type, timestamp, key).
    by_type: BTreeSet<IndexEntry>,
}

impl StoreInner {
    fn index_entry(item: &Item) -> IndexEntry {
        (item.data_type.clone(), item.timestamp, item.key())
    }

    fn put(&mut self, item: Item) {
        if let Some(previous) = self.items.get(&item.key()) {
            let stale = Self::index_entry(previous);
            self.by_type.remove(&stale);
        }
        self.by_type.insert(Self::index_entry(&item));
        self.items.insert(item.key(), item);
    }

    fn remove(&mut self, key: &ItemKey) -> Option<Item> {
        let removed = self.items.remove(key)?;
        self.by_type.remove(&Self::index_entry(&removed));
        Some(removed)
    }
}

/// In-process [`ItemStore`] that publishes every mutation to a [`LogFeed`].
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
    feed: Arc<LogFeed>,
}

impl MemoryStore {
    pub fn new(feed: Arc<LogFeed>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            feed,
        }
    }

    /// Build a store pre-populated with `items` without emitting change events.
    ///
    /// Used when restoring a snapshot: those items were already propagated.
    pub fn with_items(feed: Arc<LogFeed>, items: impl IntoIterator<Item = Item>) -> Self {
        let mut inner = StoreInner::default();
        for item in items {
            match inner.items.get(&item.key()) {
                Some(existing) if !item.supersedes(existing) => {}
                _ => inner.put(item),
            }
        }
        Self {
            inner: RwLock::new(inner),
            feed,
        }
    }

    pub fn feed(&self) -> Arc<LogFeed> {
        Arc::clone(&self.feed)
    }

    /// Live (non-expired) items, in key order.
    pub async fn live_items(&self, now: DateTime<Utc>) -> Vec<Item> {
        let inner = self.inner.read().await;
        let mut items: Vec<Item> = inner
            .items
            .values()
            .filter(|i| !i.is_expired_at(now))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.key().cmp(&b.key()));
        items
    }

    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        let mut data_types = BTreeSet::new();
        let mut sources = BTreeSet::new();
        for item in inner.items.values() {
            data_types.insert(item.data_type.as_str());
            sources.insert(item.source.as_str());
        }
        StoreStats {
            item_count: inner.items.len(),
            data_types: data_types.len(),
            sources: sources.len(),
        }
    }
}

fn validate(item: &Item) -> Result<(), StoreError> {
    if item.source.trim().is_empty() {
        return Err(StoreError::InvalidItem("empty source".into()));
    }
    if item.source.contains(KEY_SEPARATOR) {
        return Err(StoreError::InvalidItem(format!(
            "source '{}' contains '{KEY_SEPARATOR}'",
            item.source
        )));
    }
    if item.sort_key.trim().is_empty() {
        return Err(StoreError::InvalidItem(format!(
            "empty sort key for source '{}'",
            item.source
        )));
    }
    if item.data_type.trim().is_empty() {
        return Err(StoreError::InvalidItem(format!(
            "empty data type for {}",
            item.key()
        )));
    }
    Ok(())
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn upsert(&self, item: Item) -> Result<UpsertOutcome, StoreError> {
        validate(&item)?;
        let key = item.key();

        // The write lock is held across the feed append so per-key events
        // land in the feed in the same order the writes were applied.
        let mut inner = self.inner.write().await;
        let op = match inner.items.get(&key) {
            Some(existing) if !item.supersedes(existing) => {
                debug!(
                    key = %key,
                    incoming = %item.timestamp,
                    stored = %existing.timestamp,
                    "stale write skipped"
                );
                return Ok(UpsertOutcome::SkippedStale);
            }
            Some(_) => ChangeOp::Modify,
            None => ChangeOp::Insert,
        };

        inner.put(item.clone());
        self.feed.append(op, item).await;

        Ok(match op {
            ChangeOp::Insert => UpsertOutcome::Inserted,
            _ => UpsertOutcome::Modified,
        })
    }

    async fn get(&self, source: &str, sort_key: &str) -> Result<Option<Item>, StoreError> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        Ok(inner
            .items
            .get(&ItemKey::new(source, sort_key))
            .filter(|item| !item.is_expired_at(now))
            .cloned())
    }

    async fn query(&self, data_type: &str, range: TimeRange) -> Result<Vec<Item>, StoreError> {
        if range.from > range.to {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let inner = self.inner.read().await;
        let lower: IndexEntry = (data_type.to_string(), range.from, ItemKey::new("", ""));
        let items = inner
            .by_type
            .range(lower..)
            .take_while(|(dt, ts, _)| dt == data_type && range.contains(*ts))
            .filter_map(|(_, _, key)| inner.items.get(key))
            .filter(|item| !item.is_expired_at(now))
            .cloned()
            .collect();
        Ok(items)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let expired: Vec<ItemKey> = inner
            .items
            .values()
            .filter(|item| item.is_expired_at(now))
            .map(Item::key)
            .collect();

        let mut reclaimed = 0;
        for key in expired {
            if let Some(item) = inner.remove(&key) {
                self.feed.append(ChangeOp::Remove, item).await;
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            info!(reclaimed, "reclaimed expired items");
        }
        Ok(reclaimed)
    }
}
