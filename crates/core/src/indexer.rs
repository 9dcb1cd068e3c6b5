use crate::chunking::chunk_pages;
use crate::config::ChunkingConfig;
use crate::embeddings::Embedder;
use crate::error::RagError;
use crate::models::{Chunk, PageText};
use crate::traits::EmbeddingProvider;
use crate::vector_index::VectorIndex;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;
use uuid::Uuid;

/// Everything one successful build produced. Immutable once published.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub build_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub chunking: ChunkingConfig,
    chunks: Vec<Chunk>,
    pages: BTreeSet<u32>,
    index: VectorIndex,
}

impl IndexSnapshot {
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Page numbers that had text.
    pub fn pages(&self) -> &BTreeSet<u32> {
        &self.pages
    }

    pub fn vector_index(&self) -> &VectorIndex {
        &self.index
    }
}

pub type IndexHandle = Arc<IndexSnapshot>;

/// Builds snapshots and publishes the latest one.
///
/// A build runs Chunker, Embedder and `VectorIndex::build` to completion before the new
/// snapshot is swapped in, so readers only ever see a complete index. A failed or abandoned
/// build leaves the previous snapshot in place.
pub struct Indexer<P> {
    document_id: String,
    embedder: Arc<Embedder<P>>,
    current: RwLock<Option<IndexHandle>>,
}

impl<P: EmbeddingProvider> Indexer<P> {
    pub fn new(document_id: impl Into<String>, embedder: Arc<Embedder<P>>) -> Self {
        Self {
            document_id: document_id.into(),
            embedder,
            current: RwLock::new(None),
        }
    }

    pub async fn build_index(
        &self,
        pages: &[PageText],
        chunking: ChunkingConfig,
    ) -> Result<IndexHandle, RagError> {
        let started = std::time::Instant::now();
        let chunks = chunk_pages(&self.document_id, pages, chunking)?;
        info!(
            document_id = %self.document_id,
            page_count = pages.len(),
            chunk_count = chunks.len(),
            chunk_size = chunking.chunk_size,
            overlap = chunking.overlap,
            "chunked document"
        );

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let mut index = VectorIndex::new(self.embedder.dimensions());
        index.build(vectors, chunks.iter().map(Chunk::to_ref).collect())?;

        let snapshot = Arc::new(IndexSnapshot {
            build_id: Uuid::new_v4(),
            built_at: Utc::now(),
            chunking,
            pages: chunks.iter().map(|chunk| chunk.page).collect(),
            chunks,
            index,
        });

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));

        info!(
            build_id = %snapshot.build_id,
            chunk_count = snapshot.chunk_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index published"
        );
        Ok(snapshot)
    }

    pub fn current(&self) -> Option<IndexHandle> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    pub fn chunk_count(&self) -> usize {
        self.current().map_or(0, |snapshot| snapshot.chunk_count())
    }
}
