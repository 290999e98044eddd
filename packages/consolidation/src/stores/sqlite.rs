//! SQLite storage implementation.
//!
//! A file-based storage backend using SQLite. Good for:
//! - Local development
//! - Single-server deployments
//! - Testing with persistent data
//!
//! Embeddings are stored as little-endian f32 BLOBs and scored in Rust.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, FromRow};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ConsolidationError, Result};
use crate::stores::{embedding_from_bytes, embedding_to_bytes, map_sqlx};
use crate::traits::store::{best_match, DocumentRows, SourceLog, VectorSearch};
use crate::types::document::{Document, DocumentMode, DocumentPair, DocumentSource, SearchHit};

const DOCUMENT_COLUMNS: &str =
    "id, mode, title, content, category, embedding, created_at, updated_at";

/// SQLite-based document store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// The database file is created if it does not exist.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://./documents.db` - File-based database
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 5).await
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Uses a single connection; each connection would otherwise see its
    /// own empty database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(map_sqlx)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT NOT NULL,
                mode TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                category TEXT,
                embedding BLOB,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (id, mode)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_mode ON documents(mode);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_sources (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                source_url TEXT NOT NULL,
                delta TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (document_id, source_id)
            );

            CREATE INDEX IF NOT EXISTS idx_document_sources_source_id ON document_sources(source_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn upsert_row<'e, E>(executor: E, doc: &Document) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO documents (id, mode, title, content, category, embedding, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id, mode) DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            category = excluded.category,
            embedding = COALESCE(excluded.embedding, documents.embedding),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(doc.id.to_string())
    .bind(doc.mode.as_str())
    .bind(&doc.title)
    .bind(&doc.content)
    .bind(&doc.category)
    .bind(doc.embedding.as_deref().map(embedding_to_bytes))
    .bind(doc.created_at.to_rfc3339())
    .bind(doc.updated_at.to_rfc3339())
    .execute(executor)
    .await
    .map_err(map_sqlx)?;

    Ok(())
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct DocumentRow {
    id: String,
    mode: String,
    title: String,
    content: String,
    category: Option<String>,
    embedding: Option<Vec<u8>>,
    created_at: String,
    updated_at: String,
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| ConsolidationError::storage(format!("Invalid date: {}", e)))?
        .with_timezone(&Utc))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| ConsolidationError::storage(format!("Invalid id: {}", e)))
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        Ok(Document {
            id: parse_uuid(&self.id)?,
            mode: self.mode.parse()?,
            title: self.title,
            content: self.content,
            category: self.category,
            embedding: self.embedding.as_deref().map(embedding_from_bytes),
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SourceRow {
    id: String,
    document_id: String,
    source_id: String,
    source_url: String,
    delta: String,
    created_at: String,
}

impl SourceRow {
    fn into_source(self) -> Result<DocumentSource> {
        Ok(DocumentSource {
            id: parse_uuid(&self.id)?,
            document_id: parse_uuid(&self.document_id)?,
            source_id: self.source_id,
            source_url: self.source_url,
            delta: self.delta,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[async_trait]
impl DocumentRows for SqliteStore {
    async fn upsert(&self, document: &Document) -> Result<Uuid> {
        upsert_row(&self.pool, document).await?;
        Ok(document.id)
    }

    async fn replace(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO documents (id, mode, title, content, category, embedding, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document.id.to_string())
        .bind(document.mode.as_str())
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.category)
        .bind(document.embedding.as_deref().map(embedding_to_bytes))
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn remove(&self, id: Uuid, mode: DocumentMode) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE id = ? AND mode = ?")
            .bind(id.to_string())
            .bind(mode.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(())
    }

    async fn get(&self, id: Uuid, mode: DocumentMode) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM documents WHERE id = ? AND mode = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id.to_string())
        .bind(mode.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(DocumentRow::into_document).transpose()
    }

    async fn list(&self, mode: DocumentMode) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM documents WHERE mode = ? ORDER BY created_at, id",
            DOCUMENT_COLUMNS
        ))
        .bind(mode.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn upsert_pair(&self, pair: &DocumentPair) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        upsert_row(&mut *tx, &pair.full_doc).await?;
        upsert_row(&mut *tx, &pair.paragraph).await?;

        tx.commit().await.map_err(map_sqlx)?;
        debug!(document_id = %pair.id(), "Document pair committed");
        Ok(())
    }
}

#[async_trait]
impl VectorSearch for SqliteStore {
    async fn search_best(
        &self,
        embedding: &[f32],
        mode: DocumentMode,
    ) -> Result<Option<SearchHit>> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM documents WHERE mode = ? AND embedding IS NOT NULL",
            DOCUMENT_COLUMNS
        ))
        .bind(mode.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let docs = rows
            .into_iter()
            .map(DocumentRow::into_document)
            .collect::<Result<Vec<_>>>()?;

        Ok(best_match(embedding, mode, &docs))
    }
}

#[async_trait]
impl SourceLog for SqliteStore {
    async fn record_source(&self, source: &DocumentSource) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO document_sources (id, document_id, source_id, source_url, delta, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, source_id) DO NOTHING
            "#,
        )
        .bind(source.id.to_string())
        .bind(source.document_id.to_string())
        .bind(&source.source_id)
        .bind(&source.source_url)
        .bind(&source.delta)
        .bind(source.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn has_source(&self, source_id: &str) -> Result<bool> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM document_sources WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;

        Ok(count.0 > 0)
    }

    async fn sources_for(&self, document_id: Uuid) -> Result<Vec<DocumentSource>> {
        let rows = sqlx::query_as::<_, SourceRow>(
            "SELECT id, document_id, source_id, source_url, delta, created_at FROM document_sources WHERE document_id = ? ORDER BY created_at, id",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(SourceRow::into_source).collect()
    }
}
