use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunk::TextChunk;
use crate::embedding::{cosine_similarity, Embedding, EmbeddingProvider};
use crate::error::{MatrixError, Result};

pub const DEFAULT_EMBED_BATCH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexEntry {
    pub chunk: TextChunk,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    pub score: f32,
}

/// Immutable collection of embedded chunks searched by brute-force cosine
/// similarity. All entries share one dimensionality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    entries: Vec<VectorIndexEntry>,
    dimension: Option<usize>,
}

impl VectorIndex {
    pub fn build(chunks: Vec<TextChunk>, provider: &dyn EmbeddingProvider) -> Result<Self> {
        Self::build_batched(chunks, provider, DEFAULT_EMBED_BATCH)
    }

    /// Embeds `batch_size` chunks per provider call. Any failed call aborts the
    /// build; no partial index is returned.
    pub fn build_batched(
        chunks: Vec<TextChunk>,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = provider.embed_batch(&texts)?;
            if vectors.len() != texts.len() {
                return Err(MatrixError::provider(format!(
                    "{} returned {} embeddings for {} inputs",
                    provider.name(),
                    vectors.len(),
                    texts.len()
                )));
            }
            embeddings.extend(vectors);
        }
        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorIndexEntry { chunk, embedding })
            .collect();
        let index = Self::from_entries(entries)?;
        debug!(
            provider = provider.name(),
            entries = index.len(),
            dimension = index.dimension.unwrap_or(0),
            "built vector index"
        );
        Ok(index)
    }

    /// Rejects mixed dimensions and embeddings holding NaN or infinite values.
    pub fn from_entries(entries: Vec<VectorIndexEntry>) -> Result<Self> {
        let mut dimension = None;
        for entry in &entries {
            check_dimension(&mut dimension, entry.embedding.len())?;
            if entry.embedding.iter().any(|v| !v.is_finite()) {
                return Err(MatrixError::provider(format!(
                    "embedding for chunk {} has non-finite values",
                    entry.chunk.chunk_id
                )));
            }
        }
        Ok(Self { entries, dimension })
    }

    pub fn entries(&self) -> &[VectorIndexEntry] {
        &self.entries
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `k` chunks by descending similarity; equal scores keep insertion
    /// order, so results are deterministic for a fixed query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if let Some(expected) = self.dimension {
            if query.len() != expected {
                return Err(MatrixError::DimensionMismatch {
                    expected,
                    found: query.len(),
                });
            }
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(MatrixError::provider("query embedding has non-finite values"));
        }
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (idx, cosine_similarity(query, &entry.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(idx, score)| ScoredChunk {
                chunk: self.entries[idx].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Concatenates entries in input order without re-embedding.
    pub fn merge(indices: &[VectorIndex]) -> Result<VectorIndex> {
        let mut dimension = None;
        let mut entries = Vec::new();
        for index in indices {
            if let Some(dim) = index.dimension {
                check_dimension(&mut dimension, dim)?;
            }
            entries.extend(index.entries.iter().cloned());
        }
        Ok(VectorIndex { entries, dimension })
    }
}

fn check_dimension(current: &mut Option<usize>, found: usize) -> Result<()> {
    match *current {
        None => {
            *current = Some(found);
            Ok(())
        }
        Some(expected) if expected == found => Ok(()),
        Some(expected) => Err(MatrixError::DimensionMismatch { expected, found }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split_text;
    use crate::embedding::HashEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct FailingProvider {
        calls: AtomicUsize,
        fail_on: usize,
    }

    impl EmbeddingProvider for FailingProvider {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            let call = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if call == self.fail_on {
                return Err(MatrixError::provider("HTTP 429: rate limited"));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn chunks(source: &str, text: &str) -> Vec<TextChunk> {
        split_text(source, text, 8, 2).unwrap()
    }

    #[test]
    fn provider_failure_aborts_build() {
        let provider = FailingProvider {
            calls: AtomicUsize::new(0),
            fail_on: 1,
        };
        let err =
            VectorIndex::build_batched(chunks("a", "one two three four five six"), &provider, 2)
                .unwrap_err();
        match err {
            MatrixError::Provider(message) => assert!(message.contains("429")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn wrong_query_dimension_is_rejected() {
        let index =
            VectorIndex::build(chunks("a", "leave policy"), &HashEmbedder::default()).unwrap();
        let err = index.search(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, MatrixError::DimensionMismatch { expected: 64, found: 2 }));
    }

    #[test]
    fn ties_keep_insertion_order() {
        let entries = (0..3)
            .map(|i| VectorIndexEntry {
                chunk: chunks(&format!("s{i}"), "same")[0].clone(),
                embedding: vec![0.0, 1.0],
            })
            .collect();
        let index = VectorIndex::from_entries(entries).unwrap();
        let hits = index.search(&[0.0, 1.0], 2).unwrap();
        let sources: Vec<&str> = hits.iter().map(|h| h.chunk.source_id.as_str()).collect();
        assert_eq!(sources, vec!["s0", "s1"]);
    }

    #[test]
    fn merge_concatenates_and_checks_dimensions() {
        let embedder = HashEmbedder::default();
        let a = VectorIndex::build(chunks("a", "alpha beta gamma"), &embedder).unwrap();
        let b = VectorIndex::build(chunks("b", "delta"), &embedder).unwrap();
        let merged = VectorIndex::merge(&[a.clone(), VectorIndex::default(), b.clone()]).unwrap();
        assert_eq!(merged.len(), a.len() + b.len());
        assert_eq!(merged.entries()[a.len()].chunk.source_id, "b");

        let other = VectorIndex::from_entries(vec![VectorIndexEntry {
            chunk: chunks("c", "x")[0].clone(),
            embedding: vec![1.0, 0.0, 0.0],
        }])
        .unwrap();
        assert!(matches!(
            VectorIndex::merge(&[a, other]),
            Err(MatrixError::DimensionMismatch { expected: 64, found: 3 })
        ));
    }

    fn entry(source: &str, embedding: Embedding) -> VectorIndexEntry {
        VectorIndexEntry {
            chunk: chunks(source, "text")[0].clone(),
            embedding,
        }
    }

    #[test]
    fn non_finite_embeddings_are_rejected() {
        let entries = (0..200)
            .map(|i| {
                let embedding = if i % 3 == 0 {
                    vec![f32::NAN, 1.0]
                } else {
                    vec![1.0, i as f32]
                };
                entry(&format!("s{i}"), embedding)
            })
            .collect();
        assert!(matches!(
            VectorIndex::from_entries(entries),
            Err(MatrixError::Provider(_))
        ));
        assert!(matches!(
            VectorIndex::from_entries(vec![entry("inf", vec![f32::INFINITY, 0.0])]),
            Err(MatrixError::Provider(_))
        ));
    }

    #[test]
    fn overflowing_scores_do_not_break_ranking() {
        let entries = (0..200)
            .map(|i| {
                let embedding = if i % 3 == 0 {
                    vec![f32::MAX, f32::MAX]
                } else {
                    vec![1.0, i as f32]
                };
                entry(&format!("s{i}"), embedding)
            })
            .collect();
        let index = VectorIndex::from_entries(entries).unwrap();
        let hits = index.search(&[1.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| h.score.is_finite()));
        assert_eq!(hits[0].chunk.source_id, "s1");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn non_finite_query_is_rejected() {
        let index = VectorIndex::from_entries(vec![entry("a", vec![1.0, 0.0])]).unwrap();
        assert!(index.search(&[f32::NAN, 0.0], 1).is_err());
    }

    #[test]
    fn empty_index_searches_to_nothing() {
        let index = VectorIndex::build(Vec::new(), &HashEmbedder::default()).unwrap();
        assert!(index.is_empty());
        assert!(index.search(&[1.0], 3).unwrap().is_empty());
    }
}
