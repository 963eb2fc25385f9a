use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create sources table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            credentials_json TEXT,
            category TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_processed INTEGER NOT NULL DEFAULT 0,
            last_synced_at INTEGER,
            content TEXT,
            content_hash TEXT,
            summary TEXT,
            processed_at INTEGER,
            pages_crawled INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            heading TEXT,
            content TEXT NOT NULL,
            UNIQUE(source_id, chunk_index),
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create chunk_vectors table (one embedding per chunk at most)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_source_id ON chunk_vectors(source_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_is_active ON sources(is_active)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
