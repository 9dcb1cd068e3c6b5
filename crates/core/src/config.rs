//! Session configuration.
//!
//! Every tunable lives here and is handed to [`crate::DocumentSession::new`]; nothing is read
//! from the process environment inside the library.

use crate::error::RagError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 2_000;
pub const DEFAULT_OVERLAP: usize = 350;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1_536;
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters carried from the end of one chunk into the next.
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, RagError> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.overlap == 0 || self.overlap >= self.chunk_size {
            return Err(RagError::InvalidChunkConfig(format!(
                "expected 0 < overlap < chunk_size, got overlap={} chunk_size={}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// Weights of the weighted-average branch of the hybrid merge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub semantic: f32,
    pub keyword: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            keyword: 0.4,
        }
    }
}

/// Point values used by the lexical scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeywordWeights {
    /// Weight of the matched query-token fraction.
    pub term: f32,
    /// Bonus when a label of a field the query asks about appears in the chunk.
    pub label: f32,
    /// Bonus when a value shaped like that field (e.g. a 9-digit number) appears.
    pub shape: f32,
    /// Minimum keyword score of a high-confidence hit. Kept above
    /// `semantic + keyword * (term + label + shape)` so such hits cannot be outranked.
    pub high_confidence_floor: f32,
}

impl Default for KeywordWeights {
    fn default() -> Self {
        Self {
            term: 0.4,
            label: 0.15,
            shape: 0.15,
            high_confidence_floor: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub weights: ScoreWeights,
    pub keyword: KeywordWeights,
    /// Upper bound on fields answered by one extraction call.
    pub max_fields_per_group: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            weights: ScoreWeights::default(),
            keyword: KeywordWeights::default(),
            max_fields_per_group: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl RetryPolicy {
    /// Retries without sleeping in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            request_timeout_secs: 5,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Delay before retry number `retry` (1-based): doubles each time, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: usize,
    /// Maximum texts per provider request.
    pub batch_size: usize,
    /// Prepended to document texts for providers that distinguish documents from queries.
    pub document_prefix: Option<String>,
    pub query_prefix: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            batch_size: 96,
            document_prefix: None,
            query_prefix: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), RagError> {
        self.chunking.validate()?;

        let retrieval = &self.retrieval;
        if retrieval.top_k == 0 {
            return Err(RagError::InvalidArgument("top_k must be greater than 0".to_string()));
        }
        if !(-1.0..=1.0).contains(&retrieval.similarity_threshold) {
            return Err(RagError::InvalidArgument(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                retrieval.similarity_threshold
            )));
        }
        let weights = retrieval.weights;
        if weights.semantic < 0.0 || weights.keyword < 0.0 || weights.semantic + weights.keyword <= 0.0 {
            return Err(RagError::InvalidArgument(format!(
                "score weights must be non-negative with a positive sum, got semantic={} keyword={}",
                weights.semantic, weights.keyword
            )));
        }
        if retrieval.max_fields_per_group == 0 {
            return Err(RagError::InvalidArgument(
                "max_fields_per_group must be greater than 0".to_string(),
            ));
        }

        if self.embedding.dimensions == 0 {
            return Err(RagError::InvalidArgument(
                "embedding dimensions must be greater than 0".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::InvalidArgument(
                "embedding batch_size must be greater than 0".to_string(),
            ));
        }
        if self.embedding.retry.max_attempts == 0 || self.generation.retry.max_attempts == 0 {
            return Err(RagError::InvalidArgument(
                "retry max_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
