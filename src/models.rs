//! Core data models for the ingestion and retrieval pipeline.
//!
//! Persistent entities (`Source`, `Document`, `AnalysisCacheEntry`) live in
//! the SQLite registry; `ChunkPayload` and `VectorRecord` exist only as
//! vector-store payloads; the ranked/analysis types are wire shapes
//! returned to callers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where a batch of documents was discovered: a local path or a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Url,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Url => "url",
        }
    }
}

/// The originating location one or more documents were discovered from.
/// Immutable after creation; identified by a hash of its descriptor.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub kind: String,
    pub value: String,
    pub created_at: i64,
}

impl Source {
    /// Content-addressed id: sha256 of `"{kind}:{value}"`.
    pub fn id_for(kind: SourceKind, value: &str) -> String {
        sha256_hex(format!("{}:{}", kind.as_str(), value).as_bytes())
    }
}

/// A discovered document. Identity is the checksum of its raw bytes:
/// two documents with identical bytes are the same document regardless
/// of filename or location.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_id: String,
    pub file_name: String,
    pub location: String,
    pub checksum: String,
    pub text_content: Option<String>,
    pub indexed: bool,
}

/// Payload stored alongside each chunk vector. This is the only place a
/// chunk survives; chunks are never persisted as their own entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPayload {
    pub text: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub chunk_index: usize,
}

/// A point in the vector store: embedding plus chunk payload.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A chunk returned from similarity search with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub score: f64,
    pub payload: ChunkPayload,
}

/// Per-source aggregation of matched chunks, ranked by average score.
#[derive(Debug, Clone, Serialize)]
pub struct RankedSource {
    pub source: String,
    pub file_name: String,
    pub average_score: f64,
    pub matched_chunks: usize,
    pub total_score: f64,
}

/// One candidate in an analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisCandidate {
    pub source: String,
    pub score: f64,
    pub suitable: bool,
    pub justification: String,
}

/// The structured shape requested from the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub candidates: Vec<AnalysisCandidate>,
    #[serde(default)]
    pub summary: String,
}

/// A cached analysis, keyed by `(document_id, job_context_hash)`.
/// At most one entry per pair; re-analysis overwrites.
#[derive(Debug, Clone)]
pub struct AnalysisCacheEntry {
    pub id: String,
    pub document_id: String,
    pub job_context_hash: String,
    pub suitability_score: f64,
    pub suitable: bool,
    pub report: String,
    pub created_at: i64,
}

/// sha256 of raw bytes as lowercase hex. Document checksums, source ids,
/// and job-context hashes all use this.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash of the job context used as the analysis cache key. Absent or
/// blank context collapses to the literal `"standard"` so the default
/// analysis shares one cache slot.
pub fn job_context_hash(job_context: Option<&str>) -> String {
    match job_context.map(str::trim).filter(|s| !s.is_empty()) {
        Some(text) => sha256_hex(text.as_bytes()),
        None => sha256_hex(b"standard"),
    }
}

/// Last path component of a source location, used for display.
pub fn file_name_of(location: &str) -> String {
    location
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(location)
        .to_string()
}
