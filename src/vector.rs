//! Vector store abstraction.
//!
//! The store is an external similarity-search service driven through the
//! [`VectorStore`] trait: lazy collection creation sized to the first
//! embedding, batched upserts with chunk payloads, cosine top-k search,
//! and a full reset. Implementations:
//!
//! - [`QdrantStore`] — REST adapter for a Qdrant instance.
//! - [`MemoryStore`] — brute-force cosine store for tests and offline runs.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::config::VectorConfig;
use crate::errors::EngineError;
use crate::models::{ChunkPayload, ScoredChunk, VectorRecord};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection with the given dimensionality if it does not
    /// exist yet. Called with the first embedding's length.
    async fn ensure_collection(&self, dims: usize) -> Result<(), EngineError>;

    /// Upsert a batch of chunk vectors in one call.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), EngineError>;

    /// Top-k cosine search, returning scored payloads in relevance order.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, EngineError>;

    /// Drop all vectors. Used for full system reset.
    async fn reset(&self) -> Result<(), EngineError>;
}

// ============ Qdrant ============

/// Qdrant REST adapter. Collection name and URL come from `[vector]`
/// config; distance is always cosine.
pub struct QdrantStore {
    base_url: String,
    collection: String,
    client: reqwest::Client,
}

impl QdrantStore {
    pub fn new(config: &VectorConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    async fn collection_exists(&self) -> Result<bool, EngineError> {
        let resp = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(storage_err)?;
        Ok(resp.status().is_success())
    }
}

fn storage_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::StorageFailed(e.to_string())
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(EngineError::StorageFailed(format!(
        "HTTP {}: {}",
        status, body
    )))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, dims: usize) -> Result<(), EngineError> {
        if self.collection_exists().await? {
            return Ok(());
        }
        info!(collection = %self.collection, dims, "creating vector collection");
        let resp = self
            .client
            .put(self.collection_url())
            .json(&json!({ "vectors": { "size": dims, "distance": "Cosine" } }))
            .send()
            .await
            .map_err(storage_err)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), EngineError> {
        if records.is_empty() {
            return Ok(());
        }
        let points: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "vector": r.vector,
                    "payload": r.payload,
                })
            })
            .collect();

        let resp = self
            .client
            .put(format!("{}/points", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(storage_err)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, EngineError> {
        let resp = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({ "vector": vector, "limit": limit, "with_payload": true }))
            .send()
            .await
            .map_err(storage_err)?;
        let resp = check_status(resp).await?;
        let json: serde_json::Value = resp.json().await.map_err(storage_err)?;

        let hits = json
            .get("result")
            .and_then(|r| r.as_array())
            .ok_or_else(|| EngineError::StorageFailed("malformed search response".into()))?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let score = hit.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
            let Some(payload) = hit
                .get("payload")
                .and_then(|p| serde_json::from_value::<ChunkPayload>(p.clone()).ok())
            else {
                continue;
            };
            results.push(ScoredChunk { score, payload });
        }
        Ok(results)
    }

    async fn reset(&self) -> Result<(), EngineError> {
        if !self.collection_exists().await? {
            return Ok(());
        }
        let resp = self
            .client
            .delete(self.collection_url())
            .send()
            .await
            .map_err(storage_err)?;
        check_status(resp).await?;
        info!(collection = %self.collection, "vector collection dropped");
        Ok(())
    }
}

// ============ In-memory ============

/// Brute-force cosine store. The collection "exists" once a
/// dimensionality is recorded; mismatched vector lengths are rejected the
/// way a real store would reject them.
#[derive(Default)]
pub struct MemoryStore {
    dims: RwLock<Option<usize>>,
    records: RwLock<Vec<VectorRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, dims: usize) -> Result<(), EngineError> {
        let mut current = self.dims.write().unwrap();
        if current.is_none() {
            *current = Some(dims);
        }
        Ok(())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), EngineError> {
        let dims = self
            .dims
            .read()
            .unwrap()
            .ok_or_else(|| EngineError::StorageFailed("collection not created".into()))?;
        for r in &records {
            if r.vector.len() != dims {
                return Err(EngineError::StorageFailed(format!(
                    "vector length {} does not match collection dims {}",
                    r.vector.len(),
                    dims
                )));
            }
        }
        self.records.write().unwrap().extend(records);
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>, EngineError> {
        let records = self.records.read().unwrap();
        let mut scored: Vec<ScoredChunk> = records
            .iter()
            .map(|r| ScoredChunk {
                score: cosine_similarity(&r.vector, vector) as f64,
                payload: r.payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn reset(&self) -> Result<(), EngineError> {
        self.records.write().unwrap().clear();
        *self.dims.write().unwrap() = None;
        Ok(())
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` for mismatched or empty vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>, source: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            payload: ChunkPayload {
                text: format!("text {}", id),
                source: source.to_string(),
                file_name: None,
                chunk_index: 0,
            },
        }
    }

    #[tokio::test]
    async fn memory_store_ranks_by_cosine() {
        let store = MemoryStore::new();
        store.ensure_collection(2).await.unwrap();
        store
            .upsert(vec![
                record("a", vec![1.0, 0.0], "a.pdf"),
                record("b", vec![0.0, 1.0], "b.pdf"),
                record("c", vec![0.9, 0.1], "c.pdf"),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.source, "a.pdf");
        assert_eq!(hits[1].payload.source, "c.pdf");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn upsert_before_collection_fails() {
        let store = MemoryStore::new();
        let err = store
            .upsert(vec![record("a", vec![1.0], "a.pdf")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StorageFailed(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = MemoryStore::new();
        store.ensure_collection(3).await.unwrap();
        let err = store
            .upsert(vec![record("a", vec![1.0, 2.0], "a.pdf")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StorageFailed(_)));
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let store = MemoryStore::new();
        store.ensure_collection(1).await.unwrap();
        store
            .upsert(vec![record("a", vec![1.0], "a.pdf")])
            .await
            .unwrap();
        store.reset().await.unwrap();
        assert!(store.is_empty());
        // Collection must be recreated after a reset.
        let err = store
            .upsert(vec![record("b", vec![1.0], "b.pdf")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StorageFailed(_)));
    }

    #[test]
    fn cosine_basics() {
        let v = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
