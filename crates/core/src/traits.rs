use crate::error::ProviderError;
use async_trait::async_trait;
use std::sync::Arc;

/// Turns a batch of texts into raw vectors, one per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the model for a single JSON object instead of free text.
    pub json_output: bool,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<T> {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        (**self).embed_batch(texts).await
    }
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        (**self).embed_batch(texts).await
    }
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Box<T> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        (**self).generate(request).await
    }
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        (**self).generate(request).await
    }
}
