use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};

use super::traits::{Embedder, EmbeddingError};

type TextHash = [u8; 32];

/// LRU cache mapping text hash to embedding vector.
pub struct EmbeddingCache {
    cache: LruCache<TextHash, Vec<f32>>,
    hits: u64,
    misses: u64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            hits: 0,
            misses: 0,
        }
    }

    fn hash_text(text: &str) -> TextHash {
        Sha256::digest(text.as_bytes()).into()
    }

    /// Look up a cached embedding by text.
    pub fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        let key = Self::hash_text(text);
        if let Some(vec) = self.cache.get(&key) {
            self.hits += 1;
            Some(vec.clone())
        } else {
            self.misses += 1;
            None
        }
    }

    /// Store an embedding for a text.
    pub fn put(&mut self, text: &str, embedding: Vec<f32>) {
        let key = Self::hash_text(text);
        self.cache.put(key, embedding);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// [`Embedder`] decorator that serves repeated texts from an [`EmbeddingCache`].
///
/// Redelivered change events carry the same text, so they never reach the
/// backend twice while the entry is cached.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<EmbeddingCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(EmbeddingCache::new(capacity)),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        self.cache.lock().map(|c| c.hit_rate()).unwrap_or(0.0)
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results: Vec<Option<Vec<f32>>> = match self.cache.lock() {
            Ok(mut cache) => texts.iter().map(|t| cache.get(t)).collect(),
            Err(_) => vec![None; texts.len()],
        };

        let missing: Vec<&str> = texts
            .iter()
            .zip(&results)
            .filter(|(_, cached)| cached.is_none())
            .map(|(t, _)| *t)
            .collect();
        if missing.is_empty() {
            return Ok(results.into_iter().flatten().collect());
        }

        let fresh = self.inner.embed_batch(&missing).await?;
        if fresh.len() != missing.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: missing.len(),
                actual: fresh.len(),
            });
        }

        if let Ok(mut cache) = self.cache.lock() {
            for (text, vector) in missing.iter().zip(&fresh) {
                cache.put(text, vector.clone());
            }
        }

        let mut fresh = fresh.into_iter();
        for slot in results.iter_mut().filter(|slot| slot.is_none()) {
            *slot = fresh.next();
        }
        Ok(results.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cache_hit_and_miss() {
        let mut cache = EmbeddingCache::new(100);

        assert!(cache.get("hello").is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);

        cache.put("hello", vec![1.0, 2.0, 3.0]);
        let result = cache.get("hello").unwrap();
        assert_eq!(result, vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn cache_eviction() {
        let mut cache = EmbeddingCache::new(2);

        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        cache.put("c", vec![3.0]); // evicts "a"

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut cache = EmbeddingCache::new(0);
        cache.put("a", vec![1.0]);
        assert_eq!(cache.len(), 1);
    }

    struct CountingEmbedder {
        texts_seen: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        fn dimensions(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn decorator_only_embeds_misses_and_keeps_order() {
        let inner = Arc::new(CountingEmbedder { texts_seen: AtomicUsize::new(0) });
        let cached = CachedEmbedder::new(inner.clone(), 16);

        cached.embed_batch(&["aa"]).await.unwrap();
        let out = cached.embed_batch(&["b", "aa", "cccc"]).await.unwrap();

        assert_eq!(out, vec![vec![1.0], vec![2.0], vec![4.0]]);
        assert_eq!(inner.texts_seen.load(Ordering::SeqCst), 3);
        assert!(cached.hit_rate() > 0.0);
    }
}
