use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use skyfeed_core::ItemKey;

use super::{IndexDocument, IndexError, IndexWrite, SearchIndex};

/// In-process index. The staleness comparison and the write happen under
/// one lock, so concurrent writers for a key cannot interleave.
#[derive(Default)]
pub struct MemoryIndex {
    docs: RwLock<HashMap<ItemKey, IndexDocument>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(&self, doc: IndexDocument) -> Result<IndexWrite, IndexError> {
        let mut docs = self.docs.write().await;
        let key = doc.key();
        if let Some(existing) = docs.get(&key) {
            if doc.timestamp <= existing.timestamp {
                return Ok(IndexWrite::Stale);
            }
        }
        docs.insert(key, doc);
        Ok(IndexWrite::Written)
    }

    async fn get(&self, source: &str, sort_key: &str) -> Result<Option<IndexDocument>, IndexError> {
        Ok(self
            .docs
            .read()
            .await
            .get(&ItemKey::new(source, sort_key))
            .cloned())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.docs.read().await.len())
    }
}
