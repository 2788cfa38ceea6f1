//! Feature-hashing embedder
//!
//! Deterministic, offline. Used when no embedding API is configured.

use crate::llm::EmbeddingProvider;
use crate::Result;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions
    }

    /// Sign hashing keeps colliding tokens from always adding up
    fn sign(token: &str) -> f32 {
        let mut hasher = DefaultHasher::new();
        (token, "sign").hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() {
            return embedding;
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in tf {
            let tf_score = (1.0 + count / doc_len).ln();
            // longer tokens are usually rarer
            let idf_score = 1.0 + (token.len() as f32 * 0.1);
            embedding[self.bucket(token)] += tf_score * idf_score * Self::sign(token);
        }

        for window in tokens.windows(2) {
            let bigram = format!("{}_{}", window[0], window[1]);
            embedding[self.bucket(&bigram)] += 0.5 * Self::sign(&bigram);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedder::new(256);
        assert_eq!(
            embedder.embed_sync("unpaid invoices for ACME"),
            embedder.embed_sync("unpaid invoices for ACME")
        );
    }

    #[test]
    fn test_overlap_scores_higher() {
        let embedder = HashingEmbedder::new(512);
        let a = embedder.embed_sync("customer ACME pays invoices late every quarter");
        let b = embedder.embed_sync("ACME pays invoices late");
        let c = embedder.embed_sync("office rent expense in march");

        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed_sync("!");
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
