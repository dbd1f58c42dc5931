//! Error taxonomy for the ingestion/retrieval/analysis core.
//!
//! Every failure a caller can observe maps to one variant here. The
//! split follows recoverability: `ExtractionFailed`, `EmbeddingFailed`,
//! and `StorageFailed` leave the document unindexed so the same ingest
//! call can be retried later (checksum dedup makes the retry cheap);
//! `RateLimited` carries a concrete wait hint; `AnalysisFailed` is
//! terminal for that call. A malformed LLM response is deliberately
//! *not* an error — see [`crate::analyze::parse_structured_response`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input rejected before any external call (missing key, bad path).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Empty or whitespace-only query text.
    #[error("query cannot be empty")]
    InvalidQuery,

    /// Document text produced zero chunks.
    #[error("no chunks produced from document {0}")]
    EmptyDocument(String),

    /// Could not turn document bytes into text.
    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    /// An embedding call failed; the document stays unindexed.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// The vector store rejected an upsert/search; the document stays unindexed.
    #[error("vector storage failed: {0}")]
    StorageFailed(String),

    /// The provider signaled quota exhaustion, or its cooldown is active.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// LLM analysis failed for a reason other than quota or parsing.
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    /// Registry (SQLite) error.
    #[error("registry error: {0}")]
    Registry(#[from] sqlx::Error),

    /// Filesystem failure outside the registry (state files, local reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True when the caller may retry the same call later and expect
    /// progress (ingest-side transients plus rate limiting).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ExtractionFailed(_)
                | EngineError::EmbeddingFailed(_)
                | EngineError::StorageFailed(_)
                | EngineError::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_displays_wait_hint() {
        let err = EngineError::RateLimited {
            retry_after_secs: 60,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 60s");
    }

    #[test]
    fn ingest_transients_are_retryable() {
        assert!(EngineError::EmbeddingFailed("boom".into()).is_retryable());
        assert!(EngineError::StorageFailed("down".into()).is_retryable());
        assert!(!EngineError::InvalidQuery.is_retryable());
        assert!(!EngineError::AnalysisFailed("bad auth".into()).is_retryable());
    }
}
