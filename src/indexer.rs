//! Embedding indexer.
//!
//! Persists a source's chunk set (replacing whatever was there) and embeds
//! the chunks in fixed-size batches. A rate-limited batch is retried after
//! a fixed cool-down without advancing — the same batch goes out again
//! until it succeeds or the run is abandoned. Any other service error
//! skips just that batch: embeddings are best-effort, and a chunk without
//! a vector stays usable for non-semantic retrieval.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;
use crate::embedding::{vec_to_blob, EmbeddingService};
use crate::error::ServiceError;
use crate::models::{Chunk, ChunkPiece};
use crate::progress::CancelToken;
use crate::store;

/// What the indexer accomplished for one source.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexOutcome {
    pub chunks_created: usize,
    pub chunks_embedded: usize,
    pub batches_skipped: usize,
}

/// Replaces a source's chunks and embeds them batch by batch.
pub struct EmbeddingIndexer {
    /// Absent when the embedding provider is disabled; chunks are still
    /// persisted so the summary and non-semantic retrieval keep working.
    service: Option<Arc<dyn EmbeddingService>>,
    config: EmbeddingConfig,
}

impl EmbeddingIndexer {
    pub fn new(service: Option<Arc<dyn EmbeddingService>>, config: EmbeddingConfig) -> Self {
        Self { service, config }
    }

    /// Replace the source's chunks with `pieces` and embed them.
    pub async fn index(
        &self,
        pool: &SqlitePool,
        source_id: &str,
        pieces: &[ChunkPiece],
        cancel: &CancelToken,
    ) -> Result<IndexOutcome> {
        let chunks = store::replace_chunks(pool, source_id, pieces).await?;
        let mut outcome = IndexOutcome {
            chunks_created: chunks.len(),
            ..Default::default()
        };

        let Some(service) = &self.service else {
            debug!("embedding disabled, stored {} chunks unembedded", chunks.len());
            return Ok(outcome);
        };

        for batch in chunks.chunks(self.config.batch_size) {
            if cancel.is_cancelled() {
                info!("embedding cancelled, {} chunks embedded", outcome.chunks_embedded);
                return Ok(outcome);
            }
            self.embed_batch(pool, service.as_ref(), batch, cancel, &mut outcome)
                .await?;
        }

        info!(
            "embedded {}/{} chunks for source {}",
            outcome.chunks_embedded, outcome.chunks_created, source_id
        );
        Ok(outcome)
    }

    /// Embed one batch, retrying the same batch on throttling.
    async fn embed_batch(
        &self,
        pool: &SqlitePool,
        service: &dyn EmbeddingService,
        batch: &[Chunk],
        cancel: &CancelToken,
        outcome: &mut IndexOutcome,
    ) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(embedding_input).collect();

        loop {
            match service.embed_batch(&texts).await {
                Ok(vectors) => {
                    if vectors.len() != batch.len() {
                        warn!(
                            "embedding count mismatch: expected {}, got {}; skipping batch",
                            batch.len(),
                            vectors.len()
                        );
                        outcome.batches_skipped += 1;
                        return Ok(());
                    }
                    for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                        let blob = vec_to_blob(vector);
                        store::store_embedding(
                            pool,
                            &chunk.id,
                            &chunk.source_id,
                            service.model_name(),
                            service.dims(),
                            &blob,
                        )
                        .await?;
                        outcome.chunks_embedded += 1;
                    }
                    return Ok(());
                }
                Err(ServiceError::Throttled) => {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    let cooldown = Duration::from_secs(self.config.cooldown_secs);
                    warn!("embedding rate limited, cooling down {:?}", cooldown);
                    tokio::time::sleep(cooldown).await;
                }
                Err(e) => {
                    warn!("embedding batch failed, skipping: {}", e);
                    outcome.batches_skipped += 1;
                    return Ok(());
                }
            }
        }
    }
}

/// Input text for a chunk: its heading, when present, prefixed to the
/// content so the vector carries the section context.
fn embedding_input(chunk: &Chunk) -> String {
    match &chunk.heading {
        Some(heading) => format!("{}\n\n{}", heading, chunk.content),
        None => chunk.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::config::Config;
    use crate::embedding::blob_to_vec;
    use crate::migrate;

    enum Scripted {
        Succeed,
        Throttle,
        Fail,
    }

    struct ScriptedEmbedder {
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicUsize,
    }

    impl ScriptedEmbedder {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingService for ScriptedEmbedder {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Scripted::Succeed) | None => Ok(texts
                    .iter()
                    .enumerate()
                    .map(|(i, _)| vec![call as f32, i as f32])
                    .collect()),
                Some(Scripted::Throttle) => Err(ServiceError::Throttled),
                Some(Scripted::Fail) => Err(ServiceError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
            }
        }
    }

    async fn test_pool() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let toml_str = format!("[db]\npath = \"{}\"\n", dir.path().join("t.db").display());
        let config: Config = toml::from_str(&toml_str).unwrap();
        migrate::run_migrations(&config).await.unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        (pool, dir)
    }

    fn test_config(batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".into(),
            batch_size,
            cooldown_secs: 0,
            ..Default::default()
        }
    }

    fn pieces(n: usize) -> Vec<ChunkPiece> {
        (0..n)
            .map(|i| ChunkPiece {
                heading: None,
                content: format!("chunk {}", i),
            })
            .collect()
    }

    async fn source_id(pool: &SqlitePool) -> String {
        store::insert_source(pool, "Bron", "https://bron.nl", None, None)
            .await
            .unwrap()
    }

    #[test]
    fn heading_prefixes_embedding_input() {
        let with_heading = Chunk {
            id: "c1".into(),
            source_id: "s1".into(),
            chunk_index: 0,
            heading: Some("Artikel 3".into()),
            content: "De bepaling.".into(),
        };
        assert_eq!(embedding_input(&with_heading), "Artikel 3\n\nDe bepaling.");

        let without = Chunk {
            heading: None,
            ..with_heading
        };
        assert_eq!(embedding_input(&without), "De bepaling.");
    }

    #[tokio::test]
    async fn disabled_service_still_persists_chunks() {
        let (pool, _dir) = test_pool().await;
        let sid = source_id(&pool).await;
        let indexer = EmbeddingIndexer::new(None, test_config(2));

        let outcome = indexer
            .index(&pool, &sid, &pieces(3), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.chunks_created, 3);
        assert_eq!(outcome.chunks_embedded, 0);
        assert!(store::all_vectors(&pool).await.unwrap().is_empty());
        pool.close().await;
    }

    #[tokio::test]
    async fn rate_limited_batch_is_retried_not_skipped() {
        let (pool, _dir) = test_pool().await;
        let sid = source_id(&pool).await;

        // 6 chunks in batches of 2: batch 1 ok, batch 2 throttled then ok,
        // batch 3 ok. All vectors must land, in chunk order.
        let embedder = ScriptedEmbedder::new(vec![
            Scripted::Succeed,
            Scripted::Throttle,
            Scripted::Succeed,
            Scripted::Succeed,
        ]);
        let indexer = EmbeddingIndexer::new(
            Some(embedder.clone() as Arc<dyn EmbeddingService>),
            test_config(2),
        );

        let outcome = indexer
            .index(&pool, &sid, &pieces(6), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.chunks_created, 6);
        assert_eq!(outcome.chunks_embedded, 6);
        assert_eq!(outcome.batches_skipped, 0);
        assert_eq!(embedder.calls(), 4);

        let vectors = store::all_vectors(&pool).await.unwrap();
        assert_eq!(vectors.len(), 6);
        // Vector [call, position] confirms batch 2 came from the retry call.
        let batch2_first = blob_to_vec(&vectors[2].embedding);
        assert_eq!(batch2_first, vec![2.0, 0.0]);
        pool.close().await;
    }

    #[tokio::test]
    async fn other_errors_skip_only_that_batch() {
        let (pool, _dir) = test_pool().await;
        let sid = source_id(&pool).await;

        let embedder = ScriptedEmbedder::new(vec![
            Scripted::Succeed,
            Scripted::Fail,
            Scripted::Succeed,
        ]);
        let indexer = EmbeddingIndexer::new(
            Some(embedder.clone() as Arc<dyn EmbeddingService>),
            test_config(2),
        );

        let outcome = indexer
            .index(&pool, &sid, &pieces(6), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.chunks_created, 6);
        assert_eq!(outcome.chunks_embedded, 4);
        assert_eq!(outcome.batches_skipped, 1);
        assert_eq!(store::all_vectors(&pool).await.unwrap().len(), 4);
        pool.close().await;
    }

    #[tokio::test]
    async fn cancellation_stops_between_batches() {
        let (pool, _dir) = test_pool().await;
        let sid = source_id(&pool).await;

        let embedder = ScriptedEmbedder::new(vec![]);
        let indexer = EmbeddingIndexer::new(
            Some(embedder.clone() as Arc<dyn EmbeddingService>),
            test_config(2),
        );

        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = indexer
            .index(&pool, &sid, &pieces(6), &cancel)
            .await
            .unwrap();

        // Chunks are persisted (the stage had begun) but nothing embeds.
        assert_eq!(outcome.chunks_created, 6);
        assert_eq!(outcome.chunks_embedded, 0);
        assert_eq!(embedder.calls(), 0);
        pool.close().await;
    }
}
