//! PDF text extraction.
//!
//! Extraction is pipeline-layer: resolution supplies raw bytes, this
//! module returns plain UTF-8 text. The extractor itself is treated as a
//! black box; anything it rejects surfaces as
//! [`EngineError::ExtractionFailed`] and leaves the document unindexed
//! for a later retry.

use crate::errors::EngineError;

/// Seam between the ingestion pipeline and the PDF library, so tests can
/// feed plain text through the full pipeline.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, EngineError>;
}

/// Production extractor backed by `pdf-extract`.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, EngineError> {
        extract_text(bytes)
    }
}

/// Extract plain text from PDF bytes.
pub fn extract_text(bytes: &[u8]) -> Result<String, EngineError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| EngineError::ExtractionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pdf_returns_extraction_failed() {
        let err = extract_text(b"not a pdf").unwrap_err();
        assert!(matches!(err, EngineError::ExtractionFailed(_)));
    }
}
