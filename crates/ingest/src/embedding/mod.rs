pub mod cache;
pub mod hash;
pub mod ollama;
pub mod openai;
pub mod template;
pub mod traits;

use std::sync::Arc;

use tracing::{info, warn};

use skyfeed_core::config::EmbeddingConfig;

pub use cache::{CachedEmbedder, EmbeddingCache};
pub use hash::HashEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;
pub use template::item_to_text;
pub use traits::{Embedder, EmbeddingError};

/// Build the configured backend, wrapped in the LRU cache.
///
/// `openai` without an API key degrades to the local hashing embedder.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let dims = config.dimensions as usize;
    let backend: Arc<dyn Embedder> = match config.provider.as_str() {
        "openai" => match &config.openai_api_key {
            Some(key) => Arc::new(OpenAiEmbedder::new(
                key.clone(),
                config.model.clone(),
                config.openai_base_url.clone(),
                dims,
            )),
            None => {
                warn!("EMBEDDING_PROVIDER=openai but OPENAI_API_KEY is unset, using hash embedder");
                Arc::new(HashEmbedder::new(dims))
            }
        },
        "ollama" => Arc::new(OllamaEmbedder::new(
            config.ollama_url.clone(),
            config.model.clone(),
            dims,
        )),
        "hash" => Arc::new(HashEmbedder::new(dims)),
        other => {
            return Err(EmbeddingError::Config(format!(
                "unknown embedding provider '{other}' (expected openai, ollama or hash)"
            )))
        }
    };
    info!(provider = %config.provider, dimensions = dims, cache = config.cache_capacity, "embedder ready");
    Ok(Arc::new(CachedEmbedder::new(backend, config.cache_capacity)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.into(),
            model: "m".into(),
            dimensions: 16,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".into(),
            cache_capacity: 8,
        }
    }

    #[tokio::test]
    async fn openai_without_key_degrades_to_hash() {
        let embedder = build_embedder(&config("openai")).unwrap();
        assert_eq!(embedder.dimensions(), 16);
        assert_eq!(embedder.embed("offline").await.unwrap().len(), 16);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(matches!(
            build_embedder(&config("word2vec")),
            Err(EmbeddingError::Config(_))
        ));
    }
}
