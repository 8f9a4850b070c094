use async_trait::async_trait;
use thiserror::Error;

use skyfeed_core::IngestError;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedder returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Embedder misconfigured: {0}")]
    Config(String),
}

impl From<EmbeddingError> for IngestError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Http(err) if err.is_decode() => IngestError::permanent(err.to_string()),
            EmbeddingError::Http(err) => IngestError::transient(err.to_string()),
            EmbeddingError::Api { status, body } => IngestError::from_http_status(status, &body, None),
            other => IngestError::permanent(other.to_string()),
        }
    }
}

/// Trait for embedding backends (OpenAI, Ollama, local hashing).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input text (in order).
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// The dimensionality of the output vectors.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text]).await?;
        match vectors.len() {
            1 => Ok(vectors.remove(0)),
            actual => Err(EmbeddingError::CountMismatch { expected: 1, actual }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_follow_http_classification() {
        let rate: IngestError = EmbeddingError::Api { status: 429, body: "slow".into() }.into();
        assert!(rate.is_retryable());
        let bad: IngestError = EmbeddingError::Api { status: 401, body: "key".into() }.into();
        assert!(!bad.is_retryable());
        let dims: IngestError = EmbeddingError::DimensionMismatch { expected: 3, actual: 4 }.into();
        assert!(!dims.is_retryable());
    }
}
