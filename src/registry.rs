//! SQLite registry: sources, documents, and cached analyses.
//!
//! The registry is the system's source of truth for *what* has been
//! ingested; the vector store only holds derived chunk vectors. Document
//! identity is the sha256 checksum of the raw bytes, so re-ingesting the
//! same file (from anywhere, under any name) is a no-op, and an
//! interrupted ingest can be retried because `indexed` is only set after
//! the vectors are stored.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::errors::EngineError;
use crate::models::{AnalysisCacheEntry, Document, Source, SourceKind};

pub struct ChecksumRegistry {
    pool: SqlitePool,
}

impl ChecksumRegistry {
    /// Wrap a pool and bring the schema up to date.
    pub async fn open(pool: SqlitePool) -> Result<Self, EngineError> {
        let registry = Self { pool };
        registry.run_migrations().await?;
        Ok(registry)
    }

    async fn run_migrations(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(kind, value)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                location TEXT NOT NULL,
                checksum TEXT NOT NULL UNIQUE,
                text_content TEXT,
                indexed INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (source_id) REFERENCES sources(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_results (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                job_context_hash TEXT NOT NULL,
                suitability_score REAL NOT NULL,
                suitable INTEGER NOT NULL,
                report TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(document_id, job_context_hash),
                FOREIGN KEY (document_id) REFERENCES documents(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_source_id ON documents(source_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analysis_document_id ON analysis_results(document_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a source, returning the existing row if one already exists
    /// for the same `(kind, value)`.
    pub async fn create_source(
        &self,
        kind: SourceKind,
        value: &str,
    ) -> Result<Source, EngineError> {
        let id = Source::id_for(kind, value);
        let now = chrono::Utc::now().timestamp_millis();

        sqlx::query(
            "INSERT OR IGNORE INTO sources (id, kind, value, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id, kind, value, created_at FROM sources WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        Ok(source_from_row(&row))
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>, EngineError> {
        let rows =
            sqlx::query("SELECT id, kind, value, created_at FROM sources ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(source_from_row).collect())
    }

    /// Dedup lookup: the same bytes seen anywhere resolve to one document.
    pub async fn document_by_checksum(
        &self,
        checksum: &str,
    ) -> Result<Option<Document>, EngineError> {
        let row = sqlx::query(&format!("{} WHERE checksum = ?", SELECT_DOCUMENT))
            .bind(checksum)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    pub async fn document_by_location(
        &self,
        location: &str,
    ) -> Result<Option<Document>, EngineError> {
        let row = sqlx::query(&format!("{} WHERE location = ?", SELECT_DOCUMENT))
            .bind(location)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    pub async fn insert_document(&self, doc: &Document) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, source_id, file_name, location, checksum, text_content, indexed)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source_id)
        .bind(&doc.file_name)
        .bind(&doc.location)
        .bind(&doc.checksum)
        .bind(&doc.text_content)
        .bind(doc.indexed as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store extracted text and flip `indexed` once vectors are durable.
    pub async fn mark_indexed(&self, document_id: &str, text: &str) -> Result<(), EngineError> {
        sqlx::query("UPDATE documents SET text_content = ?, indexed = 1 WHERE id = ?")
            .bind(text)
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>, EngineError> {
        let rows = sqlx::query(&format!("{} ORDER BY location", SELECT_DOCUMENT))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    pub async fn documents_by_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<Document>, EngineError> {
        let rows = sqlx::query(&format!("{} WHERE source_id = ? ORDER BY location", SELECT_DOCUMENT))
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    /// Remove a source with its documents and their cached analyses.
    pub async fn remove_source(&self, source_id: &str) -> Result<u64, EngineError> {
        sqlx::query(
            "DELETE FROM analysis_results WHERE document_id IN (SELECT id FROM documents WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&self.pool)
        .await?;

        let deleted = sqlx::query("DELETE FROM documents WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;

        Ok(deleted)
    }

    /// Cache an analysis. One slot per `(document_id, job_context_hash)`;
    /// re-analysis replaces the previous entry.
    pub async fn save_analysis(&self, entry: &AnalysisCacheEntry) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO analysis_results
                (id, document_id, job_context_hash, suitability_score, suitable, report, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.document_id)
        .bind(&entry.job_context_hash)
        .bind(entry.suitability_score)
        .bind(entry.suitable as i64)
        .bind(&entry.report)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn analysis_for(
        &self,
        document_id: &str,
        job_context_hash: &str,
    ) -> Result<Option<AnalysisCacheEntry>, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT id, document_id, job_context_hash, suitability_score, suitable, report, created_at
            FROM analysis_results
            WHERE document_id = ? AND job_context_hash = ?
            "#,
        )
        .bind(document_id)
        .bind(job_context_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| AnalysisCacheEntry {
            id: row.get("id"),
            document_id: row.get("document_id"),
            job_context_hash: row.get("job_context_hash"),
            suitability_score: row.get("suitability_score"),
            suitable: row.get::<i64, _>("suitable") != 0,
            report: row.get("report"),
            created_at: row.get("created_at"),
        }))
    }

    /// Full-reset support: every document becomes re-ingestable and all
    /// cached analyses are dropped, since both were derived from vectors
    /// that no longer exist.
    pub async fn clear_indexed_state(&self) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM analysis_results")
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE documents SET indexed = 0")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

const SELECT_DOCUMENT: &str =
    "SELECT id, source_id, file_name, location, checksum, text_content, indexed FROM documents";

fn source_from_row(row: &sqlx::sqlite::SqliteRow) -> Source {
    Source {
        id: row.get("id"),
        kind: row.get("kind"),
        value: row.get("value"),
        created_at: row.get("created_at"),
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        source_id: row.get("source_id"),
        file_name: row.get("file_name"),
        location: row.get("location"),
        checksum: row.get("checksum"),
        text_content: row.get("text_content"),
        indexed: row.get::<i64, _>("indexed") != 0,
    }
}
