//! Local, deterministic embedding provider.
//!
//! Hashes character trigrams and whole words into a fixed number of buckets. It has no notion
//! of meaning beyond shared spelling, but it needs no network and is stable across runs, which
//! makes it usable for offline indexing and for tests.

use crate::chunking::{fold_diacritics, tokenize};
use crate::error::ProviderError;
use crate::traits::EmbeddingProvider;
use async_trait::async_trait;

pub const DEFAULT_NGRAM_DIMENSIONS: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_NGRAM_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Raw bucket counts; the caller normalises.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = fold_diacritics(&text.to_lowercase());
        let padded: Vec<char> = format!(" {} ", lowered.split_whitespace().collect::<Vec<_>>().join(" "))
            .chars()
            .collect();

        if padded.len() <= 2 {
            return vector;
        }

        for window in padded.windows(3) {
            let token = window.iter().collect::<String>();
            let bucket = bucket_of(&token, vector.len());
            vector[bucket] += 1.0;
        }

        for word in tokenize(text) {
            let bucket = bucket_of(&format!("w:{word}"), vector.len());
            vector[bucket] += 2.0;
        }

        vector
    }
}

fn bucket_of(token: &str, buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % buckets as u64) as usize
}

#[async_trait]
impl EmbeddingProvider for CharacterNgramEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}
