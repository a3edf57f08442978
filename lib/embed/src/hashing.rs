//! Offline embedder
//!
//! Character trigrams and whole words are hashed into a fixed number of
//! buckets and the result is L2-normalized. Needs no network and always
//! produces the same vector for the same text, so it backs tests, demos
//! and air-gapped runs.

use crate::provider::{EmbeddingProvider, ProviderError};
use async_trait::async_trait;
use colmatch_core::EmbeddingVector;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const DEFAULT_HASH_DIMENSION: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dim: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> EmbeddingVector {
        let mut data = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();

        for trigram in trigrams(&lowered) {
            data[self.bucket(&trigram)] += 1.0;
        }
        // words weigh more than the trigrams inside them
        for word in lowered.split_whitespace() {
            data[self.bucket(word)] += 2.0;
        }

        let mut vector = EmbeddingVector::new(data);
        vector.normalize();
        vector
    }

    fn bucket<T: Hash + ?Sized>(&self, item: &T) -> usize {
        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        (hasher.finish() as usize) % self.dim
    }
}

fn trigrams(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 3 {
        return if chars.is_empty() { Vec::new() } else { vec![text.to_string()] };
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dim)
    }

    async fn embed(&self, batch: &[String]) -> Result<Vec<EmbeddingVector>, ProviderError> {
        Ok(batch.iter().map(|t| self.embed_text(t)).collect())
    }
}
