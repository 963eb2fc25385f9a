//! Persistence operations for sources, chunks, and embedding vectors.
//!
//! The pipeline coordinator is the only writer; everything here is a thin
//! SQL wrapper with no business logic. Chunks are replaced wholesale inside
//! one transaction so `chunk_index` and content can never drift apart.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Chunk, ChunkPiece, Source};

/// Filter for [`find_eligible_sources`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceFilter {
    /// Include sources that were already processed (reprocess run).
    pub include_processed: bool,
}

pub async fn find_eligible_sources(pool: &SqlitePool, filter: SourceFilter) -> Result<Vec<Source>> {
    let rows = if filter.include_processed {
        sqlx::query("SELECT * FROM sources WHERE is_active = 1 ORDER BY name")
            .fetch_all(pool)
            .await?
    } else {
        sqlx::query("SELECT * FROM sources WHERE is_active = 1 AND is_processed = 0 ORDER BY name")
            .fetch_all(pool)
            .await?
    };

    rows.iter().map(row_to_source).collect()
}

/// Every registered source, active or not, for the listing command.
pub async fn list_all_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows = sqlx::query("SELECT * FROM sources ORDER BY name")
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_source).collect()
}

pub async fn get_source(pool: &SqlitePool, id: &str) -> Result<Option<Source>> {
    let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_source).transpose()
}

pub async fn insert_source(
    pool: &SqlitePool,
    name: &str,
    url: &str,
    credentials_json: Option<&str>,
    category: Option<&str>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO sources (id, name, url, credentials_json, category, is_active, is_processed, pages_crawled)
        VALUES (?, ?, ?, ?, ?, 1, 0, 0)
        "#,
    )
    .bind(&id)
    .bind(name)
    .bind(url)
    .bind(credentials_json)
    .bind(category)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Persist the raw corpus after the extraction stage.
pub async fn update_source_content(
    pool: &SqlitePool,
    source_id: &str,
    content: &str,
    pages_crawled: i64,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let content_hash = hash_text(content);

    sqlx::query(
        r#"
        UPDATE sources
        SET content = ?, content_hash = ?, pages_crawled = ?, last_synced_at = ?
        WHERE id = ?
        "#,
    )
    .bind(content)
    .bind(&content_hash)
    .bind(pages_crawled)
    .bind(now)
    .bind(source_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the generated summary and mark the source processed.
pub async fn update_source_summary(pool: &SqlitePool, source_id: &str, summary: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        UPDATE sources
        SET summary = ?, is_processed = 1, processed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(summary)
    .bind(now)
    .bind(source_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace all chunks for a source with a new set, in one transaction.
///
/// Vectors attached to the old chunks are deleted with them. Returns the
/// stored chunks in index order, with their freshly assigned ids.
pub async fn replace_chunks(
    pool: &SqlitePool,
    source_id: &str,
    pieces: &[ChunkPiece],
) -> Result<Vec<Chunk>> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM chunks WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    let mut stored = Vec::with_capacity(pieces.len());
    for (index, piece) in pieces.iter().enumerate() {
        let chunk = Chunk {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            chunk_index: index as i64,
            heading: piece.heading.clone(),
            content: piece.content.clone(),
        };

        sqlx::query(
            "INSERT INTO chunks (id, source_id, chunk_index, heading, content) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.source_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.heading)
        .bind(&chunk.content)
        .execute(&mut *tx)
        .await?;

        stored.push(chunk);
    }

    tx.commit().await?;
    Ok(stored)
}

pub async fn store_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    source_id: &str,
    model: &str,
    dims: usize,
    blob: &[u8],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, source_id, model, dims, embedding, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            source_id = excluded.source_id,
            model = excluded.model,
            dims = excluded.dims,
            embedding = excluded.embedding,
            created_at = excluded.created_at
        "#,
    )
    .bind(chunk_id)
    .bind(source_id)
    .bind(model)
    .bind(dims as i64)
    .bind(blob)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// A stored vector joined with its chunk, for the search scan.
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub chunk_id: String,
    pub source_id: String,
    pub source_name: String,
    pub heading: Option<String>,
    pub content: String,
    pub embedding: Vec<u8>,
}

pub async fn all_vectors(pool: &SqlitePool) -> Result<Vec<StoredVector>> {
    let rows = sqlx::query(
        r#"
        SELECT v.chunk_id, v.source_id, s.name AS source_name, c.heading, c.content, v.embedding
        FROM chunk_vectors v
        JOIN chunks c ON c.id = v.chunk_id
        JOIN sources s ON s.id = v.source_id
        ORDER BY v.source_id, c.chunk_index
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| StoredVector {
            chunk_id: row.get("chunk_id"),
            source_id: row.get("source_id"),
            source_name: row.get("source_name"),
            heading: row.get("heading"),
            content: row.get("content"),
            embedding: row.get("embedding"),
        })
        .collect())
}

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<Source> {
    Ok(Source {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        credentials_json: row.get("credentials_json"),
        category: row.get("category"),
        is_active: row.get::<i64, _>("is_active") != 0,
        is_processed: row.get::<i64, _>("is_processed") != 0,
        last_synced_at: row.get("last_synced_at"),
        content: row.get("content"),
        summary: row.get("summary"),
        processed_at: row.get("processed_at"),
        pages_crawled: row.get("pages_crawled"),
    })
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
