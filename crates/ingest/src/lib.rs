//! Embedding sync: turns store change events into vector-indexed documents.
//!
//! - [`embedding`]: item text templates and embedding backends (OpenAI, Ollama, hashing)
//! - [`index`]: the search index trait with in-memory and OpenSearch backends
//! - [`sync`]: [`EmbeddingSyncConsumer`], the change consumer tying both together

pub mod embedding;
pub mod index;
pub mod sync;

pub use embedding::{build_embedder, Embedder, EmbeddingError};
pub use index::{build_index, IndexDocument, IndexError, IndexWrite, SearchIndex};
pub use sync::{EmbeddingSyncConsumer, ItemResult, SyncStatus};
