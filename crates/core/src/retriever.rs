use crate::config::{GenerationConfig, RetrievalConfig, ScoreWeights};
use crate::embeddings::Embedder;
use crate::error::{ProviderStage, RagError};
use crate::indexer::IndexSnapshot;
use crate::keywords::KeywordScorer;
use crate::models::{Answer, AnswerStatus, PageScope, RetrievalResult, ScoredChunk, NO_ANSWER_TEXT};
use crate::prompt;
use crate::retry::with_retry;
use crate::traits::{EmbeddingProvider, LanguageModel};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Merges the semantic and lexical signals of one chunk.
///
/// A high-confidence lexical hit takes the larger of the two scores; everything else gets the
/// weighted average. Monotonic in both scores for a fixed flag.
pub fn combine_scores(semantic: f32, keyword: f32, high_confidence: bool, weights: &ScoreWeights) -> f32 {
    if high_confidence {
        return semantic.max(keyword);
    }
    let total = weights.semantic + weights.keyword;
    if total <= 0.0 {
        return 0.0;
    }
    (weights.semantic * semantic + weights.keyword * keyword) / total
}

/// Per-call overrides of the configured retrieval knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetrievalOptions {
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub scope: Option<PageScope>,
}

impl RetrievalOptions {
    pub fn scoped(scope: Option<PageScope>) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }
}

pub struct HybridRetriever<P> {
    embedder: Arc<Embedder<P>>,
    scorer: KeywordScorer,
    config: RetrievalConfig,
}

impl<P: EmbeddingProvider> HybridRetriever<P> {
    pub fn new(embedder: Arc<Embedder<P>>, config: RetrievalConfig) -> Result<Self, RagError> {
        Ok(Self {
            embedder,
            scorer: KeywordScorer::new(config.keyword)?,
            config,
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn scorer(&self) -> &KeywordScorer {
        &self.scorer
    }

    pub async fn retrieve(
        &self,
        snapshot: &IndexSnapshot,
        query: &str,
        options: RetrievalOptions,
    ) -> Result<RetrievalResult, RagError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidArgument("query must not be empty".to_string()));
        }
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let threshold = options
            .similarity_threshold
            .unwrap_or(self.config.similarity_threshold);
        if top_k == 0 {
            return Err(RagError::InvalidArgument("top_k must be greater than 0".to_string()));
        }
        if let Some(scope) = options.scope {
            if !snapshot.pages().iter().any(|&page| scope.contains(page)) {
                return Err(RagError::InvalidPageScope(format!(
                    "no indexed page falls within {scope}"
                )));
            }
        }
        let in_scope = |page: u32| options.scope.map_or(true, |scope| scope.contains(page));

        let query_vector = self.embedder.embed_query(query).await?;
        let index = snapshot.vector_index();

        // Rank over the whole index so the scope filter cannot starve the top-k.
        let semantic: HashMap<usize, (usize, f32)> = index
            .search(&query_vector, index.len())?
            .into_iter()
            .filter(|hit| in_scope(hit.chunk.page) && hit.similarity >= threshold)
            .take(top_k)
            .enumerate()
            .map(|(rank, hit)| (hit.chunk.index, (rank, hit.similarity)))
            .collect();

        let terms = self.scorer.analyze_query(query);
        let mut hits: Vec<ScoredChunk> = Vec::new();
        for chunk in snapshot.chunks().iter().filter(|chunk| in_scope(chunk.page)) {
            let lexical = self.scorer.score(&terms, chunk);
            let semantic_hit = semantic.get(&chunk.index).copied();
            if semantic_hit.is_none() && lexical.score <= 0.0 {
                continue;
            }

            let semantic_score = semantic_hit.map_or(0.0, |(_, similarity)| similarity);
            let combined_score = combine_scores(
                semantic_score,
                lexical.score,
                lexical.high_confidence,
                &self.config.weights,
            );
            debug!(
                chunk = chunk.index,
                page = chunk.page,
                semantic_score,
                keyword_score = lexical.score,
                combined_score,
                high_confidence = lexical.high_confidence,
                "scored candidate"
            );
            hits.push(ScoredChunk {
                chunk: chunk.clone(),
                semantic_score,
                keyword_score: lexical.score,
                combined_score,
                high_confidence: lexical.high_confidence,
                semantic_rank: semantic_hit.map(|(rank, _)| rank),
                matched_terms: lexical.matched_terms,
            });
        }

        hits.sort_by(rank_order);
        hits.truncate(top_k);

        info!(
            query_len = query.chars().count(),
            semantic_candidates = semantic.len(),
            returned = hits.len(),
            top_score = hits.first().map_or(0.0, |hit| hit.combined_score),
            "retrieval finished"
        );

        Ok(RetrievalResult {
            query: query.to_string(),
            similarity_threshold: threshold,
            hits,
        })
    }

    /// Retrieves evidence and has the model answer from it. Without evidence the model is not
    /// called and a fixed no-answer result comes back instead.
    pub async fn answer<L: LanguageModel + ?Sized>(
        &self,
        snapshot: &IndexSnapshot,
        llm: &L,
        generation: &GenerationConfig,
        question: &str,
    ) -> Result<Answer, RagError> {
        let evidence = self
            .retrieve(snapshot, question, RetrievalOptions::default())
            .await?;
        if evidence.is_empty() {
            info!("no evidence for question, skipping generation");
            return Ok(Answer {
                text: NO_ANSWER_TEXT.to_string(),
                status: AnswerStatus::NoEvidence,
                evidence,
            });
        }

        let request = prompt::answer_request(question.trim(), &evidence, generation);
        let text = with_retry(ProviderStage::Generate, &generation.retry, || llm.generate(&request)).await?;

        Ok(Answer {
            text: text.trim().to_string(),
            status: AnswerStatus::Answered,
            evidence,
        })
    }
}

/// Combined score descending, then semantic rank (semantic candidates first), then document order.
fn rank_order(left: &ScoredChunk, right: &ScoredChunk) -> Ordering {
    right
        .combined_score
        .total_cmp(&left.combined_score)
        .then_with(|| match (left.semantic_rank, right.semantic_rank) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| left.chunk.index.cmp(&right.chunk.index))
}
