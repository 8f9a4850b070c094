//! Search index seam.
//!
//! Documents are keyed by the item identity `(source, sort_key)` and carry
//! the item timestamp as their version, so writing the same snapshot twice
//! is a no-op and an older snapshot never replaces a newer one.

pub mod memory;
pub mod opensearch;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use skyfeed_core::config::IndexConfig;
use skyfeed_core::{IngestError, Item, ItemKey};

pub use memory::MemoryIndex;
pub use opensearch::OpenSearchIndex;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("index API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed index response: {0}")]
    Malformed(String),

    #[error("index misconfigured: {0}")]
    Config(String),
}

impl From<IndexError> for IngestError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Http(err) if err.is_decode() || err.is_builder() => {
                IngestError::permanent(err.to_string())
            }
            IndexError::Http(err) => IngestError::transient(err.to_string()),
            IndexError::Api { status, body } => IngestError::from_http_status(status, &body, None),
            other => IngestError::permanent(other.to_string()),
        }
    }
}

/// One indexed item: text, vector and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub source: String,
    pub sort_key: String,
    pub data_type: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub embedding: Vec<f32>,
    pub payload: serde_json::Value,
    pub indexed_at: DateTime<Utc>,
}

impl IndexDocument {
    pub fn from_item(item: &Item, text: String, embedding: Vec<f32>) -> Self {
        Self {
            source: item.source.clone(),
            sort_key: item.sort_key.clone(),
            data_type: item.data_type.clone(),
            timestamp: item.timestamp,
            text,
            embedding,
            payload: item.payload.clone(),
            indexed_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.source, &self.sort_key)
    }

    /// External version: the item timestamp in milliseconds.
    pub fn version(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Outcome of an index write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWrite {
    Written,
    /// The index already holds this or a newer snapshot.
    Stale,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Idempotent overwrite keyed by `(source, sort_key)`. A document whose
    /// timestamp is not newer than the stored one is rejected as stale.
    async fn upsert(&self, doc: IndexDocument) -> Result<IndexWrite, IndexError>;

    async fn get(&self, source: &str, sort_key: &str) -> Result<Option<IndexDocument>, IndexError>;

    /// Number of documents held.
    async fn count(&self) -> Result<usize, IndexError>;
}

/// Build the configured index backend.
pub async fn build_index(
    config: &IndexConfig,
    dimensions: usize,
) -> Result<Arc<dyn SearchIndex>, IndexError> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(MemoryIndex::new())),
        "opensearch" => {
            let index = OpenSearchIndex::new(
                &config.opensearch_url,
                &config.opensearch_index,
                config.opensearch_username.clone(),
                config.opensearch_password.clone(),
            );
            index.ensure_index(dimensions).await?;
            Ok(Arc::new(index))
        }
        other => Err(IndexError::Config(format!(
            "unknown index provider '{other}' (expected memory or opensearch)"
        ))),
    }
}
