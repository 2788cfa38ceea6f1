//! Embedding service
//!
//! Wraps an [`EmbeddingProvider`] and guarantees every vector handed to the
//! memory store has the configured dimension. Identical inputs are memoized
//! for a short TTL; the cache is an optimization only.

mod hashing;

pub use hashing::HashingEmbedder;

use crate::config::EmbeddingConfig;
use crate::error::AgentError;
use crate::llm::EmbeddingProvider;
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

struct CachedEmbedding {
    vector: Arc<[f32]>,
    stored_at: Instant,
}

pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
    cache_ttl: Duration,
    cache_max_entries: usize,
    cache: RwLock<HashMap<String, CachedEmbedding>>,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Result<Self> {
        if provider.dimensions() != config.dimensions {
            return Err(AgentError::Config(format!(
                "Embedding provider '{}' produces {} dimensions, configuration expects {}",
                provider.model_name(),
                provider.dimensions(),
                config.dimensions
            )));
        }

        Ok(Self {
            provider,
            dimensions: config.dimensions,
            cache_ttl: config.cache_ttl,
            cache_max_entries: config.cache_max_entries,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Convert text to a vector of exactly `dimensions()` floats.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::Embedding("Cannot embed empty text".to_string()));
        }

        let key = cache_key(text);

        if !self.cache_ttl.is_zero() {
            let cache = self.cache.read().await;
            if let Some(hit) = cache.get(&key) {
                if hit.stored_at.elapsed() < self.cache_ttl {
                    debug!("Embedding cache hit");
                    return Ok(hit.vector.to_vec());
                }
            }
        }

        let vector = self.provider.embed(text).await.map_err(|e| match e {
            AgentError::Embedding(_) => e,
            other => AgentError::Embedding(other.to_string()),
        })?;

        if vector.len() != self.dimensions {
            return Err(AgentError::Embedding(format!(
                "Embedding dimensions mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }

        if !self.cache_ttl.is_zero() {
            self.remember(key, &vector).await;
        }

        Ok(vector)
    }

    async fn remember(&self, key: String, vector: &[f32]) {
        let mut cache = self.cache.write().await;

        if cache.len() >= self.cache_max_entries {
            let ttl = self.cache_ttl;
            cache.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        }

        if cache.len() >= self.cache_max_entries {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                cache.remove(&oldest);
            }
        }

        cache.insert(
            key,
            CachedEmbedding {
                vector: Arc::from(vector),
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn cache_key(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Cosine similarity between two vectors; 0.0 when undefined
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
