//! Retrieval: embed a query, search the vector store, rank sources.
//!
//! Chunk hits are aggregated per source document and ranked by *average*
//! chunk score rather than best single chunk, so a document matching on
//! many chunks beats one lucky outlier. The sort is stable over
//! first-seen (relevance) order, which also breaks ties deterministically.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::{embed_gated, EmbeddingClient};
use crate::errors::EngineError;
use crate::models::{file_name_of, RankedSource, ScoredChunk};
use crate::rate::RateGate;
use crate::vector::VectorStore;

pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    gate: Arc<RateGate>,
    top_k: usize,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        gate: Arc<RateGate>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            gate,
            top_k,
        }
    }

    /// Top-k chunk hits for a query, most relevant first.
    ///
    /// The query is validated before any external call so a blank query
    /// never burns an embedding request.
    pub async fn search(&self, query: &str) -> Result<Vec<ScoredChunk>, EngineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(EngineError::InvalidQuery);
        }

        let vector = embed_gated(self.gate.as_ref(), self.embedder.as_ref(), query).await?;
        let hits = self.store.search(&vector, self.top_k).await?;
        debug!(query, hits = hits.len(), "retrieval complete");
        Ok(hits)
    }

    /// Chunk hits aggregated into per-source rankings.
    pub async fn ranked(&self, query: &str) -> Result<Vec<RankedSource>, EngineError> {
        let hits = self.search(query).await?;
        Ok(rank_sources(&hits))
    }
}

/// Group chunk hits by source and rank by average chunk score.
pub fn rank_sources(hits: &[ScoredChunk]) -> Vec<RankedSource> {
    let mut ranked: Vec<RankedSource> = Vec::new();

    for hit in hits {
        match ranked.iter_mut().find(|r| r.source == hit.payload.source) {
            Some(entry) => {
                entry.total_score += hit.score;
                entry.matched_chunks += 1;
            }
            None => ranked.push(RankedSource {
                source: hit.payload.source.clone(),
                file_name: hit
                    .payload
                    .file_name
                    .clone()
                    .unwrap_or_else(|| file_name_of(&hit.payload.source)),
                average_score: 0.0,
                matched_chunks: 1,
                total_score: hit.score,
            }),
        }
    }

    for entry in &mut ranked {
        entry.average_score = entry.total_score / entry.matched_chunks as f64;
    }

    // Stable: ties keep first-seen (relevance) order.
    ranked.sort_by(|a, b| {
        b.average_score
            .partial_cmp(&a.average_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::config::RateConfig;
    use crate::models::ChunkPayload;
    use crate::provider::ProviderKind;
    use crate::vector::MemoryStore;

    fn hit(source: &str, score: f64) -> ScoredChunk {
        ScoredChunk {
            score,
            payload: ChunkPayload {
                text: "chunk".into(),
                source: source.to_string(),
                file_name: None,
                chunk_index: 0,
            },
        }
    }

    #[test]
    fn average_beats_single_outlier() {
        // bob has one high chunk; alice matches consistently.
        let hits = vec![
            hit("/cvs/bob.pdf", 0.95),
            hit("/cvs/alice.pdf", 0.90),
            hit("/cvs/alice.pdf", 0.88),
            hit("/cvs/bob.pdf", 0.40),
        ];
        let ranked = rank_sources(&hits);
        assert_eq!(ranked[0].source, "/cvs/alice.pdf");
        assert_eq!(ranked[0].matched_chunks, 2);
        assert!((ranked[0].average_score - 0.89).abs() < 1e-9);
        assert_eq!(ranked[1].source, "/cvs/bob.pdf");
        assert!((ranked[1].average_score - 0.675).abs() < 1e-9);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let hits = vec![hit("/cvs/a.pdf", 0.5), hit("/cvs/b.pdf", 0.5)];
        let ranked = rank_sources(&hits);
        assert_eq!(ranked[0].source, "/cvs/a.pdf");
        assert_eq!(ranked[1].source, "/cvs/b.pdf");
    }

    #[test]
    fn file_name_falls_back_to_location_tail() {
        let ranked = rank_sources(&[hit("/cvs/carol.pdf", 0.7)]);
        assert_eq!(ranked[0].file_name, "carol.pdf");
    }

    struct StaticEmbedder;

    #[async_trait]
    impl EmbeddingClient for StaticEmbedder {
        fn provider(&self) -> ProviderKind {
            ProviderKind::Gemini
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngineError> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn engine(store: Arc<MemoryStore>, dir: &std::path::Path) -> RetrievalEngine {
        let gate = Arc::new(RateGate::new(RateConfig {
            min_interval_ms: 0,
            rpm_limit: 10_000,
            tpm_limit: 10_000_000,
            window_secs: 60,
            state_path: dir.join("rate_state.json"),
        }));
        RetrievalEngine::new(store, Arc::new(StaticEmbedder), gate, 10)
    }

    #[tokio::test]
    async fn blank_query_is_rejected_before_any_call() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(MemoryStore::new()), tmp.path());
        assert!(matches!(
            engine.search("   ").await.unwrap_err(),
            EngineError::InvalidQuery
        ));
    }

    #[tokio::test]
    async fn empty_index_returns_no_hits() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.ensure_collection(2).await.unwrap();
        let engine = engine(store, tmp.path());
        assert!(engine.ranked("rust engineer").await.unwrap().is_empty());
    }
}
