//! Flat in-memory vector index.
//!
//! Vectors are stored row-major in one contiguous buffer and scored with a plain inner
//! product. Every stored and query vector is unit length, so the inner product is the cosine
//! similarity.

use crate::embeddings::is_unit_norm;
use crate::error::RagError;
use crate::models::ChunkRef;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk: ChunkRef,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    vectors: Vec<f32>,
    entries: Vec<ChunkRef>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChunkRef] {
        &self.entries
    }

    /// Replaces the whole index. On error the previous contents are left untouched.
    pub fn build(&mut self, vectors: Vec<Vec<f32>>, chunk_refs: Vec<ChunkRef>) -> Result<(), RagError> {
        if vectors.len() != chunk_refs.len() {
            return Err(RagError::InvalidArgument(format!(
                "vector count {} does not match chunk count {}",
                vectors.len(),
                chunk_refs.len()
            )));
        }

        let mut flat = Vec::with_capacity(vectors.len() * self.dimension);
        for (position, vector) in vectors.iter().enumerate() {
            if vector.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
            if !is_unit_norm(vector) {
                return Err(RagError::InvalidArgument(format!(
                    "vector {position} is not unit length"
                )));
            }
            flat.extend_from_slice(vector);
        }

        self.vectors = flat;
        self.entries = chunk_refs;
        Ok(())
    }

    /// Up to `k` entries ordered by descending cosine similarity; ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, RagError> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .map(|row| row.iter().zip(query).map(|(a, b)| a * b).sum::<f32>())
            .enumerate()
            .collect();

        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored.truncate(k.min(self.entries.len()));

        Ok(scored
            .into_iter()
            .map(|(position, similarity)| VectorHit {
                chunk: self.entries[position].clone(),
                similarity,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::normalize_in_place;

    fn chunk_ref(index: usize) -> ChunkRef {
        ChunkRef {
            index,
            chunk_id: format!("chunk-{index}"),
            page: 1,
        }
    }

    fn unit(values: &[f32]) -> Vec<f32> {
        let mut vector = values.to_vec();
        assert!(normalize_in_place(&mut vector));
        vector
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index
            .build(
                vec![unit(&[1.0, 0.0, 0.0]), unit(&[0.0, 1.0, 0.0]), unit(&[1.0, 1.0, 0.0])],
                (0..3).map(chunk_ref).collect(),
            )
            .unwrap();
        index
    }

    #[test]
    fn search_on_empty_index_returns_nothing() {
        let index = VectorIndex::new(3);
        assert!(index.is_empty());
        assert!(index.search(&unit(&[1.0, 0.0, 0.0]), 5).unwrap().is_empty());
    }

    #[test]
    fn results_are_sorted_by_similarity() {
        let index = sample_index();
        let hits = index.search(&unit(&[1.0, 0.2, 0.0]), 3).unwrap();

        let order: Vec<usize> = hits.iter().map(|hit| hit.chunk.index).collect();
        assert_eq!(order, vec![0, 2, 1]);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert!((hits[0].similarity - unit(&[1.0, 0.2, 0.0])[0]).abs() < 1e-6);
    }

    #[test]
    fn k_is_clamped_to_stored_count() {
        let index = sample_index();
        assert_eq!(index.search(&unit(&[0.0, 1.0, 0.0]), 50).unwrap().len(), 3);
        assert_eq!(index.search(&unit(&[0.0, 1.0, 0.0]), 1).unwrap().len(), 1);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut index = VectorIndex::new(2);
        let same = unit(&[1.0, 1.0]);
        index
            .build(vec![same.clone(), same.clone(), same.clone()], (0..3).map(chunk_ref).collect())
            .unwrap();
        let order: Vec<usize> = index
            .search(&same, 3)
            .unwrap()
            .iter()
            .map(|hit| hit.chunk.index)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn failed_build_leaves_previous_contents() {
        let mut index = sample_index();

        let mismatched = index.build(vec![unit(&[1.0, 0.0])], vec![chunk_ref(9)]);
        assert!(matches!(
            mismatched,
            Err(RagError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));

        let miscounted = index.build(vec![unit(&[1.0, 0.0, 0.0])], Vec::new());
        assert!(matches!(miscounted, Err(RagError::InvalidArgument(_))));

        let unnormalised = index.build(vec![vec![2.0, 0.0, 0.0]], vec![chunk_ref(9)]);
        assert!(unnormalised.is_err());

        assert_eq!(index.len(), 3);
        assert_eq!(index.entries()[2].index, 2);
    }

    #[test]
    fn query_dimension_is_checked() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(RagError::DimensionMismatch { .. })
        ));
    }
}
