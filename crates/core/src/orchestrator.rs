use crate::config::{ChunkingConfig, RagConfig};
use crate::embeddings::Embedder;
use crate::error::RagError;
use crate::extractor::{ExtractionResult, Extractor};
use crate::indexer::{IndexHandle, Indexer};
use crate::models::{Answer, PageScope, PageText, RetrievalResult};
use crate::retriever::{HybridRetriever, RetrievalOptions};
use crate::schema::ExtractionSchema;
use crate::traits::{EmbeddingProvider, LanguageModel};
use std::sync::Arc;

/// One loaded document: its index and the three operations callers use on it.
///
/// Sessions share nothing; several can run side by side with different configurations.
pub struct DocumentSession<E, L> {
    config: RagConfig,
    indexer: Indexer<E>,
    retriever: HybridRetriever<E>,
    llm: L,
}

impl<E, L> DocumentSession<E, L>
where
    E: EmbeddingProvider,
    L: LanguageModel,
{
    pub fn new(
        config: RagConfig,
        document_id: impl Into<String>,
        embedding_provider: E,
        llm: L,
    ) -> Result<Self, RagError> {
        config.validate()?;
        let embedder = Arc::new(Embedder::new(embedding_provider, config.embedding.clone()));
        Ok(Self {
            indexer: Indexer::new(document_id, Arc::clone(&embedder)),
            retriever: HybridRetriever::new(embedder, config.retrieval.clone())?,
            config,
            llm,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    /// Builds with the session's chunking settings.
    pub async fn build_index(&self, pages: &[PageText]) -> Result<IndexHandle, RagError> {
        self.indexer.build_index(pages, self.config.chunking).await
    }

    pub async fn build_index_with(
        &self,
        pages: &[PageText],
        chunking: ChunkingConfig,
    ) -> Result<IndexHandle, RagError> {
        self.indexer.build_index(pages, chunking).await
    }

    pub fn is_ready(&self) -> bool {
        self.indexer.is_ready()
    }

    pub fn chunk_count(&self) -> usize {
        self.indexer.chunk_count()
    }

    pub fn current_index(&self) -> Option<IndexHandle> {
        self.indexer.current()
    }

    pub async fn retrieve(
        &self,
        query: &str,
        scope: Option<PageScope>,
    ) -> Result<RetrievalResult, RagError> {
        let snapshot = self.snapshot()?;
        self.retriever
            .retrieve(&snapshot, query, RetrievalOptions::scoped(scope))
            .await
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, RagError> {
        let snapshot = self.snapshot()?;
        self.retriever
            .answer(&snapshot, &self.llm, &self.config.generation, question)
            .await
    }

    pub async fn extract(
        &self,
        schema: &ExtractionSchema,
        scope: Option<PageScope>,
    ) -> Result<ExtractionResult, RagError> {
        let snapshot = self.snapshot()?;
        Extractor::new(&self.retriever, &self.llm, &self.config.generation)
            .extract(&snapshot, schema, scope)
            .await
    }

    /// Pinned for the whole operation, so a concurrent rebuild cannot change the index under it.
    fn snapshot(&self) -> Result<IndexHandle, RagError> {
        self.indexer.current().ok_or(RagError::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::CharacterNgramEmbedder;
    use crate::traits::GenerationRequest;
    use async_trait::async_trait;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
            Ok("{}".to_string())
        }
    }

    fn session() -> DocumentSession<CharacterNgramEmbedder, EchoModel> {
        let mut config = RagConfig::default();
        config.embedding.dimensions = 64;
        DocumentSession::new(config, "doc", CharacterNgramEmbedder::new(64), EchoModel).unwrap()
    }

    #[tokio::test]
    async fn operations_before_build_are_not_ready() {
        let session = session();
        assert!(!session.is_ready());
        assert!(matches!(session.ask("REGON?").await, Err(RagError::NotReady)));
        assert!(matches!(session.retrieve("REGON", None).await, Err(RagError::NotReady)));
        let schema = ExtractionSchema::from_names(["regon"]).unwrap();
        assert!(matches!(session.extract(&schema, None).await, Err(RagError::NotReady)));
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let mut config = RagConfig::default();
        config.retrieval.top_k = 0;
        let result = DocumentSession::new(config, "doc", CharacterNgramEmbedder::new(64), EchoModel);
        assert!(matches!(result, Err(RagError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn build_makes_the_session_ready() {
        let session = session();
        session
            .build_index(&[PageText::new(1, "REGON: 362794360.")])
            .await
            .unwrap();
        assert!(session.is_ready());
        assert_eq!(session.chunk_count(), 1);
        assert!(session.current_index().is_some());
    }
}
