//! Semantic search over stored chunk vectors.
//!
//! Embeds the query, scans every stored vector with cosine similarity,
//! and prints the top results with source attribution. A brute-force scan
//! is plenty at knowledge-base scale; chunks without vectors simply never
//! surface here and remain reachable through the stored summaries.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, EmbeddingService, HttpEmbeddingClient};
use crate::store;

const DEFAULT_LIMIT: usize = 10;
const SNIPPET_CHARS: usize = 160;

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let client: Arc<dyn EmbeddingService> =
        Arc::new(HttpEmbeddingClient::from_config(&config.embedding)?);
    let query_vec = client
        .embed_batch(&[query.to_string()])
        .await
        .context("embedding the query failed")?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty embedding response"))?;

    let pool = db::connect(config).await?;
    let vectors = store::all_vectors(&pool).await?;

    if vectors.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    let mut scored: Vec<(f32, &store::StoredVector)> = vectors
        .iter()
        .map(|v| (cosine_similarity(&query_vec, &blob_to_vec(&v.embedding)), v))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    for (score, result) in scored.iter().take(limit) {
        let heading = result.heading.as_deref().unwrap_or("-");
        println!(
            "{:.3}  {}  [{}]\n       {}",
            score,
            result.source_name,
            heading,
            snippet(&result.content)
        );
    }

    pool.close().await;
    Ok(())
}

fn snippet(content: &str) -> String {
    let one_line: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.len() <= SNIPPET_CHARS {
        return one_line;
    }
    let mut end = SNIPPET_CHARS;
    while end > 0 && !one_line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &one_line[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_is_single_line_and_bounded() {
        let content = "regel een\nregel twee   met   spaties\n".repeat(20);
        let s = snippet(&content);
        assert!(!s.contains('\n'));
        assert!(s.len() <= SNIPPET_CHARS + '…'.len_utf8());
    }

    #[test]
    fn short_snippet_untouched() {
        assert_eq!(snippet("kort stukje"), "kort stukje");
    }
}
