use crate::config::EmbeddingConfig;
use crate::error::{ProviderError, ProviderStage, RagError};
use crate::retry::with_retry;
use crate::traits::EmbeddingProvider;
use tracing::debug;

/// Tolerance used when checking that a vector is unit length.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

pub fn is_unit_norm(vector: &[f32]) -> bool {
    (l2_norm(vector) - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

/// Scales `vector` to unit length. Returns `false` for an all-zero vector.
pub fn normalize_in_place(vector: &mut [f32]) -> bool {
    let magnitude = l2_norm(vector);
    if magnitude == 0.0 || !magnitude.is_finite() {
        return false;
    }
    for value in vector.iter_mut() {
        *value /= magnitude;
    }
    true
}

/// Batches texts through an [`EmbeddingProvider`] and returns unit-length vectors of the
/// configured dimension, in input order.
pub struct Embedder<P> {
    provider: P,
    config: EmbeddingConfig,
}

impl<P: EmbeddingProvider> Embedder<P> {
    pub fn new(provider: P, config: EmbeddingConfig) -> Self {
        Self { provider, config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let prepared = with_prefix(texts, self.config.document_prefix.as_deref());
        self.embed_prepared(&prepared).await
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let prepared = with_prefix(&[text.to_string()], self.config.query_prefix.as_deref());
        let mut vectors = self.embed_prepared(&prepared).await?;
        vectors.pop().ok_or_else(|| RagError::Provider {
            stage: ProviderStage::Embed,
            attempts: 1,
            source: ProviderError::fatal("provider returned no vector for the query"),
        })
    }

    async fn embed_prepared(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let batch_size = self.config.batch_size.max(1);
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_number, batch) in texts.chunks(batch_size).enumerate() {
            debug!(batch_number, batch_len = batch.len(), model = %self.config.model, "embedding batch");
            let raw = with_retry(ProviderStage::Embed, &self.config.retry, || {
                self.provider.embed_batch(batch)
            })
            .await?;

            if raw.len() != batch.len() {
                return Err(RagError::Provider {
                    stage: ProviderStage::Embed,
                    attempts: 1,
                    source: ProviderError::fatal(format!(
                        "provider returned {} vectors for {} inputs",
                        raw.len(),
                        batch.len()
                    )),
                });
            }

            for mut vector in raw {
                if vector.len() != self.config.dimensions {
                    return Err(RagError::DimensionMismatch {
                        expected: self.config.dimensions,
                        actual: vector.len(),
                    });
                }
                if !normalize_in_place(&mut vector) {
                    return Err(RagError::Provider {
                        stage: ProviderStage::Embed,
                        attempts: 1,
                        source: ProviderError::fatal("provider returned a zero-length vector"),
                    });
                }
                vectors.push(vector);
            }
        }

        Ok(vectors)
    }
}

fn with_prefix(texts: &[String], prefix: Option<&str>) -> Vec<String> {
    match prefix {
        Some(prefix) if !prefix.is_empty() => {
            texts.iter().map(|text| format!("{prefix}{text}")).collect()
        }
        _ => texts.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns `[len, index, 1]` per text, unnormalised, and records batch sizes.
    struct RecordingProvider {
        batches: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let mut batches = self.batches.lock().unwrap();
            let offset: usize = batches.iter().map(Vec::len).sum();
            batches.push(texts.to_vec());
            Ok(texts
                .iter()
                .enumerate()
                .map(|(position, text)| vec![text.len() as f32, (offset + position) as f32, 1.0])
                .collect())
        }
    }

    fn config(batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            dimensions: 3,
            batch_size,
            retry: RetryPolicy::immediate(1),
            ..EmbeddingConfig::default()
        }
    }

    fn provider() -> RecordingProvider {
        RecordingProvider {
            batches: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn splits_into_batches_and_preserves_order() {
        let embedder = Embedder::new(provider(), config(2));
        let texts: Vec<String> = (0..5).map(|index| "x".repeat(index + 1)).collect();

        let vectors = embedder.embed(&texts).await.unwrap();

        assert_eq!(vectors.len(), 5);
        let batch_lens: Vec<usize> = embedder
            .provider
            .batches
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(batch_lens, vec![2, 2, 1]);

        for (index, vector) in vectors.iter().enumerate() {
            let expected_ratio = (index + 1) as f32 / index.max(1) as f32;
            if index > 0 {
                assert!((vector[0] / vector[1] - expected_ratio).abs() < 1e-4);
            }
        }
    }

    #[tokio::test]
    async fn every_vector_has_unit_norm() {
        let embedder = Embedder::new(provider(), config(3));
        let texts: Vec<String> = ["a", "longer text", "zażółć gęślą jaźń"]
            .iter()
            .map(|text| text.to_string())
            .collect();

        for vector in embedder.embed(&texts).await.unwrap() {
            assert!((l2_norm(&vector) - 1.0).abs() < UNIT_NORM_TOLERANCE);
        }
        let query = embedder.embed_query("ile pięter").await.unwrap();
        assert!(is_unit_norm(&query));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_reported() {
        let embedder = Embedder::new(
            provider(),
            EmbeddingConfig {
                dimensions: 4,
                ..config(8)
            },
        );
        let result = embedder.embed(&["text".to_string()]).await;
        assert!(matches!(
            result,
            Err(RagError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn query_prefix_is_applied_only_to_queries() {
        let embedder = Embedder::new(
            provider(),
            EmbeddingConfig {
                query_prefix: Some("query: ".to_string()),
                ..config(8)
            },
        );
        embedder.embed(&["doc".to_string()]).await.unwrap();
        embedder.embed_query("question").await.unwrap();

        let batches = embedder.provider.batches.lock().unwrap();
        assert_eq!(batches[0], vec!["doc".to_string()]);
        assert_eq!(batches[1], vec!["query: question".to_string()]);
    }
}
