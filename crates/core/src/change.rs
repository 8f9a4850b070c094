use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::{Item, ItemKey};

/// Kind of store mutation observed on the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOp {
    Insert,
    Modify,
    Remove,
}

/// A single mutation of the store, as seen by feed consumers.
///
/// `sequence` is the position within `partition`; it increases monotonically
/// per partition and is what consumers commit after processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub item: Item,
    pub partition: String,
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn key(&self) -> ItemKey {
        self.item.key()
    }

    /// Only inserts and modifications propagate to the search index.
    pub fn is_forwardable(&self) -> bool {
        matches!(self.op, ChangeOp::Insert | ChangeOp::Modify)
    }
}
