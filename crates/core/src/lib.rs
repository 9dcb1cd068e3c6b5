pub mod chunking;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod keywords;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod retriever;
pub mod retry;
pub mod schema;
pub mod traits;
pub mod validators;
pub mod vector_index;

pub use chunking::{chunk_pages, fold_diacritics, normalize_whitespace, tokenize};
pub use config::{
    ChunkingConfig, EmbeddingConfig, GenerationConfig, KeywordWeights, RagConfig, RetrievalConfig,
    RetryPolicy, ScoreWeights,
};
pub use document::{fingerprint, load_pages, LopdfSource, PageSource, PlainTextSource};
pub use embeddings::Embedder;
pub use error::{ProviderError, ProviderErrorKind, ProviderStage, RagError, Result};
pub use extractor::{Confidence, ExtractedField, ExtractionResult, Extractor};
pub use indexer::{IndexHandle, IndexSnapshot, Indexer};
pub use keywords::KeywordScorer;
pub use models::{
    Answer, AnswerStatus, Chunk, ChunkRef, DocumentFingerprint, PageScope, PageText,
    RetrievalResult, ScoredChunk,
};
pub use orchestrator::DocumentSession;
pub use providers::{CharacterNgramEmbedder, OpenAiClient, OpenAiSettings};
pub use retriever::{combine_scores, HybridRetriever, RetrievalOptions};
pub use schema::{ExtractionSchema, FieldFamily, SchemaField};
pub use traits::{EmbeddingProvider, GenerationRequest, LanguageModel};
pub use validators::FieldValidator;
pub use vector_index::{VectorHit, VectorIndex};
