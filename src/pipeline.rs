//! Harvest pipeline coordination.
//!
//! Sequences one source through authenticate → discover → extract →
//! summarize → chunk → embed, persisting intermediate state after each
//! stage and reporting progress to the caller. Authentication and
//! discovery failures are soft — the run degrades to whatever the page
//! gives us — while failures from the summarization stage onward end the
//! run, keeping the state persisted so far.
//!
//! Stages run strictly sequentially, and so do article visits: one browser
//! tab is one serial timeline, and serial visits keep us off the target
//! site's anti-automation radar. Batch runs over multiple sources pause
//! between sources for the same reason.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth::{host_of, select_strategy};
use crate::browser::{BrowserSession, PageControl};
use crate::chunk::chunk_text;
use crate::completion::CompletionService;
use crate::config::Config;
use crate::discover::discover_links;
use crate::embedding::EmbeddingService;
use crate::extract::extract_content;
use crate::indexer::EmbeddingIndexer;
use crate::models::{Article, Source};
use crate::progress::{CancelToken, ProgressEvent, ProgressSink};
use crate::store;
use crate::summarize::Summarizer;

/// Length of the summary preview included in the terminal result event.
const PREVIEW_CHARS: usize = 500;

/// Pipeline stage, used for progress reporting and transition logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Authenticating,
    Discovering,
    Extracting,
    Summarizing,
    Chunking,
    Embedding,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Authenticating => "authenticating",
            Stage::Discovering => "discovering",
            Stage::Extracting => "extracting",
            Stage::Summarizing => "summarizing",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counters for one completed run, reported in the result event.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub articles_processed: usize,
    pub total_chars: usize,
    pub summary_length: usize,
    pub chunks_created: usize,
    pub preview: String,
}

/// Outcome of a batch run over multiple sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
}

/// Owns the full pipeline for harvest runs.
///
/// All collaborators arrive through the constructor; the coordinator holds
/// no global state and reads no environment.
pub struct Coordinator {
    config: Config,
    pool: SqlitePool,
    summarizer: Summarizer,
    indexer: EmbeddingIndexer,
}

impl Coordinator {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        completion: Arc<dyn CompletionService>,
        embedding: Option<Arc<dyn EmbeddingService>>,
    ) -> Self {
        let summarizer = Summarizer::new(completion, config.summarize.clone());
        let indexer = EmbeddingIndexer::new(embedding, config.embedding.clone());
        Self {
            config,
            pool,
            summarizer,
            indexer,
        }
    }

    /// Harvest every eligible source sequentially, with a cool-down pause
    /// between sources. A failed source does not stop the batch.
    pub async fn run_eligible(
        &self,
        filter: store::SourceFilter,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        let sources = store::find_eligible_sources(&self.pool, filter).await?;
        info!("{} eligible source(s)", sources.len());

        let mut outcome = BatchOutcome::default();
        for (i, source) in sources.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("batch cancelled after {} source(s)", i);
                break;
            }
            if i > 0 {
                let pause = Duration::from_secs(self.config.crawl.source_cooldown_secs);
                info!("cooling down {:?} before next source", pause);
                tokio::time::sleep(pause).await;
            }

            match self.run_source(source, sink, cancel).await {
                Ok(_) => outcome.processed += 1,
                Err(e) => {
                    warn!("source {} failed: {:#}", source.name, e);
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Harvest one source end to end.
    ///
    /// The browser session is exclusively owned by this run and torn down
    /// on every exit path.
    pub async fn run_source(
        &self,
        source: &Source,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunStats> {
        info!("harvesting source {} ({})", source.name, source.url);

        let session = BrowserSession::launch(&self.config.browser)
            .await
            .context("browser launch failed")?;
        let page = match session.new_page().await {
            Ok(page) => page,
            Err(e) => {
                session.close().await;
                sink.report(ProgressEvent::Error {
                    message: format!("could not open page: {}", e),
                });
                return Err(e);
            }
        };

        let result = self.run_stages(&page, source, sink, cancel).await;
        session.close().await;

        match result {
            Ok(stats) => {
                sink.report(ProgressEvent::Result {
                    articles_processed: stats.articles_processed,
                    total_chars: stats.total_chars,
                    summary_length: stats.summary_length,
                    chunks_created: stats.chunks_created,
                    preview: stats.preview.clone(),
                });
                sink.report(ProgressEvent::Done);
                Ok(stats)
            }
            Err(e) => {
                sink.report(ProgressEvent::Error {
                    message: format!("{:#}", e),
                });
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        page: &dyn PageControl,
        source: &Source,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunStats> {
        // ── Authenticating ────────────────────────────────────────────
        status(sink, Stage::Authenticating, "logging in");
        let credentials = match source.credentials() {
            Ok(creds) => creds,
            Err(e) => {
                warn!("stored credentials for {} are malformed: {}", source.name, e);
                None
            }
        };
        let strategy = select_strategy(&source.url, &self.config.crawl.sso_hosts);
        let authenticated = match strategy
            .authenticate(page, &source.url, credentials.as_ref())
            .await
        {
            Ok(ok) => ok,
            Err(e) => {
                warn!("authentication errored for {}: {:#}", source.name, e);
                false
            }
        };
        // Soft failure: the session may already be authenticated, or the
        // page may be public. Continue with whatever state exists.
        status(
            sink,
            Stage::Authenticating,
            if authenticated {
                "authenticated"
            } else {
                "proceeding without confirmed login"
            },
        );
        ensure_not_cancelled(cancel)?;

        // ── Discovering ───────────────────────────────────────────────
        page.goto_soft(&source.url).await;
        status(sink, Stage::Discovering, "collecting article links");
        let host = host_of(&source.url).unwrap_or_default();
        let links = discover_links(page, &host, self.config.crawl.max_links).await;
        status(
            sink,
            Stage::Discovering,
            &format!("{} candidate link(s)", links.len()),
        );
        ensure_not_cancelled(cancel)?;

        // ── Extracting ────────────────────────────────────────────────
        let mut corpus = String::new();
        let mut articles_processed = 0usize;

        if links.is_empty() {
            // Best effort given current page state: the landing page
            // itself may be the content.
            status(sink, Stage::Extracting, "no links, extracting landing page");
            let (title, text) = extract_content(page).await;
            let article = Article {
                url: source.url.clone(),
                title: if title.is_empty() {
                    source.name.clone()
                } else {
                    title
                },
                text,
            };
            if self.append_article(&mut corpus, &article) {
                articles_processed += 1;
            }
        } else {
            for (i, link) in links.iter().enumerate() {
                ensure_not_cancelled(cancel)?;
                if corpus.len() >= self.config.crawl.max_corpus_chars {
                    info!("corpus cap reached after {} article(s)", articles_processed);
                    break;
                }

                status(
                    sink,
                    Stage::Extracting,
                    &format!("page {} of {}: {}", i + 1, links.len(), link.url),
                );
                page.goto_soft(&link.url).await;
                let (title, text) = extract_content(page).await;
                let article = Article {
                    url: link.url.clone(),
                    title: if title.is_empty() {
                        link.title.clone()
                    } else {
                        title
                    },
                    text,
                };
                if self.append_article(&mut corpus, &article) {
                    articles_processed += 1;
                }
            }
        }

        if corpus.trim().is_empty() {
            bail!("no articles could be extracted from {}", source.url);
        }

        store::update_source_content(&self.pool, &source.id, &corpus, articles_processed as i64)
            .await
            .context("persisting raw content")?;
        status(
            sink,
            Stage::Extracting,
            &format!("{} article(s), {} chars", articles_processed, corpus.len()),
        );
        ensure_not_cancelled(cancel)?;

        // ── Summarizing ───────────────────────────────────────────────
        status(sink, Stage::Summarizing, "generating summary");
        let summary = self
            .summarizer
            .summarize(&source.name, &corpus)
            .await
            .context("summarization failed")?;
        store::update_source_summary(&self.pool, &source.id, &summary)
            .await
            .context("persisting summary")?;
        ensure_not_cancelled(cancel)?;

        // ── Chunking ──────────────────────────────────────────────────
        status(sink, Stage::Chunking, "splitting corpus into chunks");
        let pieces = chunk_text(&corpus, self.config.chunking.target_chars);
        ensure_not_cancelled(cancel)?;

        // ── Embedding ─────────────────────────────────────────────────
        status(
            sink,
            Stage::Embedding,
            &format!("indexing {} chunk(s)", pieces.len()),
        );
        let index_outcome = self
            .indexer
            .index(&self.pool, &source.id, &pieces, cancel)
            .await
            .context("chunk indexing failed")?;

        Ok(RunStats {
            articles_processed,
            total_chars: corpus.len(),
            summary_length: summary.len(),
            chunks_created: index_outcome.chunks_created,
            preview: preview_of(&summary),
        })
    }

    /// Append an extracted article to the corpus, enforcing the noise
    /// threshold and the per-article and per-corpus caps. Returns whether
    /// the article was kept.
    fn append_article(&self, corpus: &mut String, article: &Article) -> bool {
        append_article(
            corpus,
            article,
            self.config.crawl.min_article_chars,
            self.config.crawl.max_article_chars,
            self.config.crawl.max_corpus_chars,
        )
    }
}

fn status(sink: &dyn ProgressSink, stage: Stage, message: &str) {
    sink.report(ProgressEvent::Status {
        stage: stage.to_string(),
        message: message.to_string(),
    });
}

fn ensure_not_cancelled(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        bail!("run cancelled");
    }
    Ok(())
}

fn preview_of(summary: &str) -> String {
    let end = floor_char_boundary(summary, PREVIEW_CHARS.min(summary.len()));
    summary[..end].to_string()
}

/// Pure corpus-assembly step, kept free for testing.
fn append_article(
    corpus: &mut String,
    article: &Article,
    min_chars: usize,
    max_article_chars: usize,
    max_corpus_chars: usize,
) -> bool {
    // Below the noise threshold: navigation stubs, error pages, teasers.
    if article.text.len() < min_chars {
        return false;
    }
    if corpus.len() >= max_corpus_chars {
        return false;
    }

    let text_end = floor_char_boundary(&article.text, max_article_chars.min(article.text.len()));
    let text = &article.text[..text_end];

    if !corpus.is_empty() {
        corpus.push_str("\n\n");
    }
    corpus.push_str(&format!("# {}\n{}\n\n{}", article.title, article.url, text));

    // The cap bounds storage and downstream completion input.
    if corpus.len() > max_corpus_chars {
        let end = floor_char_boundary(corpus, max_corpus_chars);
        corpus.truncate(end);
    }

    true
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
