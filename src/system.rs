//! Full system reset.

use tracing::info;

use crate::errors::EngineError;
use crate::registry::ChecksumRegistry;
use crate::vector::VectorStore;

/// Drop all vectors and derived registry state. Documents and sources
/// survive, so a later ingest of the same locations rebuilds the index
/// from the stored checksums without re-downloading anything already on
/// disk.
pub async fn reset(
    store: &dyn VectorStore,
    registry: &ChecksumRegistry,
) -> Result<(), EngineError> {
    store.reset().await?;
    registry.clear_indexed_state().await?;
    info!("system reset complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{sha256_hex, ChunkPayload, Document, SourceKind, VectorRecord};
    use crate::vector::MemoryStore;

    #[tokio::test]
    async fn reset_clears_vectors_and_indexed_flags() {
        let pool = db::connect_memory().await.unwrap();
        let registry = ChecksumRegistry::open(pool).await.unwrap();
        let src = registry
            .create_source(SourceKind::File, "/cvs")
            .await
            .unwrap();
        let doc = Document {
            id: "doc-1".into(),
            source_id: src.id,
            file_name: "a.pdf".into(),
            location: "/cvs/a.pdf".into(),
            checksum: sha256_hex(b"a"),
            text_content: None,
            indexed: false,
        };
        registry.insert_document(&doc).await.unwrap();
        registry.mark_indexed(&doc.id, "text").await.unwrap();

        let store = MemoryStore::new();
        store.ensure_collection(1).await.unwrap();
        store
            .upsert(vec![VectorRecord {
                id: "v".into(),
                vector: vec![1.0],
                payload: ChunkPayload {
                    text: "t".into(),
                    source: "/cvs/a.pdf".into(),
                    file_name: None,
                    chunk_index: 0,
                },
            }])
            .await
            .unwrap();

        reset(&store, &registry).await.unwrap();

        assert!(store.is_empty());
        let docs = registry.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(!docs[0].indexed);
    }
}
