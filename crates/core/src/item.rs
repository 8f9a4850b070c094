use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Joins source and sort key in the rendered key. Source names may not contain it.
pub const KEY_SEPARATOR: char = '#';

/// Primary identity of an item: the owning source plus a source-unique sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemKey {
    pub source: String,
    pub sort_key: String,
}

impl ItemKey {
    pub fn new(source: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sort_key: sort_key.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.source, self.sort_key)
    }
}

/// One normalized record produced by a source adapter.
///
/// `(source, sort_key)` is unique in the store. `timestamp` is the logical
/// event time: it orders the secondary index and decides which of two writes
/// for the same key wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub source: String,
    pub sort_key: String,
    pub data_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    /// Unix epoch seconds after which the item is logically gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_epoch: Option<i64>,
}

impl Item {
    pub fn new(
        source: impl Into<String>,
        sort_key: impl Into<String>,
        data_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            source: source.into(),
            sort_key: sort_key.into(),
            data_type: data_type.into(),
            timestamp,
            payload,
            expiry_epoch: None,
        }
    }

    pub fn with_expiry(mut self, expiry_epoch: i64) -> Self {
        self.expiry_epoch = Some(expiry_epoch);
        self
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.source, &self.sort_key)
    }

    /// An item whose expiry epoch has been reached is excluded from reads
    /// and from index propagation.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry_epoch, Some(epoch) if epoch <= now.timestamp())
    }

    /// Whether this snapshot is strictly fresher than `other`.
    ///
    /// Equal timestamps do not supersede: replaying the same version is a no-op.
    pub fn supersedes(&self, other: &Item) -> bool {
        self.timestamp > other.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item_at(secs: i64) -> Item {
        Item::new(
            "nasa",
            "apod-2024-01-01",
            "apod",
            Utc.timestamp_opt(secs, 0).unwrap(),
            serde_json::json!({ "title": "Horsehead" }),
        )
    }

    #[test]
    fn key_display() {
        assert_eq!(item_at(0).key().to_string(), "nasa#apod-2024-01-01");
    }

    #[test]
    fn supersedes_requires_strictly_newer() {
        let older = item_at(100);
        let newer = item_at(200);
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));
        assert!(!older.supersedes(&older.clone()));
    }

    #[test]
    fn expiry_is_inclusive_of_the_epoch() {
        let item = item_at(0).with_expiry(1_000);
        assert!(!item.is_expired_at(Utc.timestamp_opt(999, 0).unwrap()));
        assert!(item.is_expired_at(Utc.timestamp_opt(1_000, 0).unwrap()));
        assert!(!item_at(0).is_expired_at(Utc::now()));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(item_at(0).with_expiry(5)).unwrap();
        assert_eq!(json["sortKey"], "apod-2024-01-01");
        assert_eq!(json["dataType"], "apod");
        assert_eq!(json["expiryEpoch"], 5);
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
    }
}
