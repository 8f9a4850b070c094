//! Idempotent keyed item store with a partitioned change feed.
//!
//! - [`ItemStore`]: upsert/get/query/reclaim contract shared by every writer
//! - [`MemoryStore`]: in-process implementation with a time-ordered secondary index
//! - [`ChangeFeed`] / [`LogFeed`]: ordered, at-least-once mutation log per partition
//! - [`snapshot`]: JSONL persistence of live items across restarts

pub mod error;
pub mod feed;
pub mod snapshot;
pub mod store;

pub use error::StoreError;
pub use feed::{ChangeFeed, LogFeed};
pub use store::{ItemStore, MemoryStore, StoreStats, TimeRange, UpsertOutcome};
