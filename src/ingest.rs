//! Ingestion pipeline: resolve, dedup, extract, chunk, embed, store.
//!
//! The pipeline is the only writer of documents and vectors. Ordering
//! matters for crash safety: the document row is created first, vectors
//! are written next, and `indexed` is flipped last. A failure anywhere
//! leaves the document unindexed, and because identity is the byte
//! checksum, the next ingest of the same location retries exactly the
//! documents that did not finish.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{embed_gated, EmbeddingClient};
use crate::errors::EngineError;
use crate::extract::TextExtractor;
use crate::models::{sha256_hex, ChunkPayload, Document, VectorRecord};
use crate::rate::RateGate;
use crate::registry::ChecksumRegistry;
use crate::resolve::{resolve_location, RawDocument};
use crate::vector::VectorStore;

/// What happened to one document within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    /// Chunked, embedded, and stored.
    Indexed { chunks: usize },
    /// Identical bytes were already indexed; nothing was done.
    Duplicate,
    /// Extraction, embedding, or storage failed; retryable on re-ingest.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub file_name: String,
    pub location: String,
    pub status: DocumentStatus,
}

/// Batch-level summary returned to the caller.
#[derive(Debug)]
pub struct IngestReport {
    pub origin: String,
    pub outcomes: Vec<DocumentOutcome>,
    /// Items that could not even be loaded, `(location, reason)`.
    pub skipped: Vec<(String, String)>,
}

impl IngestReport {
    pub fn indexed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, DocumentStatus::Indexed { .. }))
            .count()
    }

    pub fn duplicate_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == DocumentStatus::Duplicate)
            .count()
    }
}

pub struct IngestionPipeline {
    registry: Arc<ChecksumRegistry>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    extractor: Arc<dyn TextExtractor>,
    gate: Arc<RateGate>,
    chunking: ChunkingConfig,
}

impl IngestionPipeline {
    pub fn new(
        registry: Arc<ChecksumRegistry>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        extractor: Arc<dyn TextExtractor>,
        gate: Arc<RateGate>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            registry,
            store,
            embedder,
            extractor,
            gate,
            chunking,
        }
    }

    /// Resolve a location and ingest everything found there.
    ///
    /// Per-document failures are recorded and the batch continues, with
    /// one exception: a rate-limit cooldown aborts the batch, because
    /// every remaining document would fail the same way.
    pub async fn ingest_location(&self, location: &str) -> Result<IngestReport, EngineError> {
        let batch = resolve_location(location).await?;
        let source = self
            .registry
            .create_source(batch.kind, &batch.origin)
            .await?;

        info!(
            origin = %batch.origin,
            documents = batch.documents.len(),
            skipped = batch.skipped.len(),
            "ingesting batch"
        );

        let mut report = IngestReport {
            origin: batch.origin,
            outcomes: Vec::with_capacity(batch.documents.len()),
            skipped: batch.skipped,
        };

        for raw in batch.documents {
            let file_name = raw.file_name.clone();
            let location = raw.location.clone();
            let status = match self.index_document(&source.id, raw).await {
                Ok(status) => status,
                Err(EngineError::RateLimited { retry_after_secs }) => {
                    warn!(retry_after_secs, "rate limited, aborting batch");
                    return Err(EngineError::RateLimited { retry_after_secs });
                }
                Err(e) => {
                    warn!(location = %location, error = %e, "document failed, continuing batch");
                    DocumentStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            report.outcomes.push(DocumentOutcome {
                file_name,
                location,
                status,
            });
        }

        info!(
            origin = %report.origin,
            indexed = report.indexed_count(),
            duplicates = report.duplicate_count(),
            "batch complete"
        );
        Ok(report)
    }

    /// Index one document: dedup by checksum, extract, chunk, embed, store.
    async fn index_document(
        &self,
        source_id: &str,
        raw: RawDocument,
    ) -> Result<DocumentStatus, EngineError> {
        let checksum = sha256_hex(&raw.bytes);

        let document = match self.registry.document_by_checksum(&checksum).await? {
            Some(existing) if existing.indexed => {
                info!(location = %raw.location, "duplicate checksum, skipping");
                return Ok(DocumentStatus::Duplicate);
            }
            // Known but unindexed: a previous attempt died mid-way. Retry
            // under the original document id.
            Some(existing) => existing,
            None => {
                let document = Document {
                    id: Uuid::new_v4().to_string(),
                    source_id: source_id.to_string(),
                    file_name: raw.file_name.clone(),
                    location: raw.location.clone(),
                    checksum,
                    text_content: None,
                    indexed: false,
                };
                self.registry.insert_document(&document).await?;
                document
            }
        };

        let text = self.extractor.extract(&raw.bytes)?;
        let chunks = chunk_text(&text, self.chunking.chunk_size, self.chunking.overlap);
        if chunks.is_empty() {
            return Err(EngineError::EmptyDocument(raw.location));
        }

        let embeds = chunks
            .iter()
            .map(|chunk| embed_gated(self.gate.as_ref(), self.embedder.as_ref(), chunk));
        let vectors = futures::future::try_join_all(embeds).await?;

        self.store.ensure_collection(vectors[0].len()).await?;

        let records = chunks
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (chunk, vector))| VectorRecord {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: ChunkPayload {
                    text: chunk.clone(),
                    source: raw.location.clone(),
                    file_name: Some(raw.file_name.clone()),
                    chunk_index,
                },
            })
            .collect::<Vec<_>>();
        let chunk_count = records.len();
        self.store.upsert(records).await?;

        self.registry.mark_indexed(&document.id, &text).await?;
        info!(location = %raw.location, chunks = chunk_count, "document indexed");
        Ok(DocumentStatus::Indexed {
            chunks: chunk_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::RateConfig;
    use crate::db;
    use crate::provider::ProviderKind;
    use crate::vector::MemoryStore;

    struct PlainExtractor;

    impl TextExtractor for PlainExtractor {
        fn extract(&self, bytes: &[u8]) -> Result<String, EngineError> {
            String::from_utf8(bytes.to_vec())
                .map_err(|e| EngineError::ExtractionFailed(e.to_string()))
        }
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for CountingEmbedder {
        fn provider(&self) -> ProviderKind {
            ProviderKind::Gemini
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    async fn pipeline(
        dir: &std::path::Path,
    ) -> (IngestionPipeline, Arc<ChecksumRegistry>, Arc<MemoryStore>, Arc<CountingEmbedder>) {
        let pool = db::connect_memory().await.unwrap();
        let registry = Arc::new(ChecksumRegistry::open(pool).await.unwrap());
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let gate = Arc::new(RateGate::new(RateConfig {
            min_interval_ms: 0,
            rpm_limit: 10_000,
            tpm_limit: 10_000_000,
            window_secs: 60,
            state_path: dir.join("rate_state.json"),
        }));
        let pipeline = IngestionPipeline::new(
            registry.clone(),
            store.clone(),
            embedder.clone(),
            Arc::new(PlainExtractor),
            gate,
            ChunkingConfig {
                chunk_size: 64,
                overlap: 8,
            },
        );
        (pipeline, registry, store, embedder)
    }

    #[tokio::test]
    async fn ingests_a_directory_and_dedups_on_reingest() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        std::fs::write(docs.join("alice.pdf"), "Alice is a Rust engineer. She builds systems.").unwrap();
        std::fs::write(docs.join("bob.pdf"), "Bob writes Python. He likes data pipelines.").unwrap();

        let (pipeline, registry, store, embedder) = pipeline(tmp.path()).await;
        let location = docs.to_str().unwrap();

        let report = pipeline.ingest_location(location).await.unwrap();
        assert_eq!(report.indexed_count(), 2);
        assert_eq!(report.duplicate_count(), 0);
        assert!(!store.is_empty());
        let first_calls = embedder.calls.load(Ordering::SeqCst);
        assert!(first_calls >= 2);

        // Same bytes again: everything dedups, no new embeddings.
        let report = pipeline.ingest_location(location).await.unwrap();
        assert_eq!(report.indexed_count(), 0);
        assert_eq!(report.duplicate_count(), 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), first_calls);

        let documents = registry.list_documents().await.unwrap();
        assert_eq!(documents.len(), 2);
        assert!(documents.iter().all(|d| d.indexed));
    }

    #[tokio::test]
    async fn renamed_copy_of_same_bytes_is_a_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        std::fs::write(docs.join("cv.pdf"), "Same person, same bytes.").unwrap();

        let (pipeline, registry, _store, _embedder) = pipeline(tmp.path()).await;
        pipeline
            .ingest_location(docs.to_str().unwrap())
            .await
            .unwrap();

        std::fs::write(docs.join("cv_final_v2.pdf"), "Same person, same bytes.").unwrap();
        let report = pipeline
            .ingest_location(docs.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(report.indexed_count(), 0);
        assert_eq!(report.duplicate_count(), 2);
        assert_eq!(registry.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_document_fails_without_sinking_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        std::fs::write(docs.join("blank.pdf"), "   \n  ").unwrap();
        std::fs::write(docs.join("real.pdf"), "Actual resume content here.").unwrap();

        let (pipeline, _registry, _store, _embedder) = pipeline(tmp.path()).await;
        let report = pipeline
            .ingest_location(docs.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(report.indexed_count(), 1);
        let failed: Vec<_> = report
            .outcomes
            .iter()
            .filter(|o| matches!(o.status, DocumentStatus::Failed { .. }))
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].location.ends_with("blank.pdf"));
    }

    #[tokio::test]
    async fn chunk_payloads_carry_source_and_index() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        std::fs::write(docs.join("cv.pdf"), "Short resume.").unwrap();

        let (pipeline, _registry, store, _embedder) = pipeline(tmp.path()).await;
        pipeline
            .ingest_location(docs.to_str().unwrap())
            .await
            .unwrap();

        let hits = store.search(&[1.0, 1.0], 10).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].payload.source.ends_with("cv.pdf"));
        assert_eq!(hits[0].payload.file_name.as_deref(), Some("cv.pdf"));
        assert_eq!(hits[0].payload.chunk_index, 0);
    }
}
