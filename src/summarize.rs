//! Summarization orchestrator.
//!
//! Splits a source's raw corpus into completion-sized windows, summarizes
//! each window through the [`CompletionService`], and consolidates multiple
//! partial summaries into one document. Rate limits are retried with a
//! linearly increasing backoff; any other service error is fatal for the
//! run — a partial summary silently standing in for the whole corpus would
//! be worse than no summary. The one exception is the consolidation step,
//! which degrades to the concatenated partials.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chunk::find_split_point;
use crate::completion::{CompletionRequest, CompletionService};
use crate::config::SummarizeConfig;
use crate::error::ServiceError;

/// Separator between partial summaries in the concatenated fallback.
const PARTIAL_SEPARATOR: &str = "\n\n---\n\n";

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are a knowledge analyst for an internal legal knowledge base. \
Extract the substantive knowledge from the provided source material: \
rulings, doctrines, obligations, deadlines, definitions, and practical \
implications. Write a structured summary in clear professional prose, \
preserving article numbers and case identifiers exactly as they appear. \
Ignore navigation text, advertisements, and other site chrome.";

const CONSOLIDATE_SYSTEM_PROMPT: &str = "\
You are a knowledge analyst for an internal legal knowledge base. \
The user content contains several partial summaries of one source, \
separated by '---'. Merge them into a single coherent document, removing \
duplication while keeping every substantive point, article number, and \
case identifier.";

/// Orchestrates windowed summarization over a completion service.
pub struct Summarizer {
    service: Arc<dyn CompletionService>,
    config: SummarizeConfig,
}

impl Summarizer {
    pub fn new(service: Arc<dyn CompletionService>, config: SummarizeConfig) -> Self {
        Self { service, config }
    }

    /// Summarize a raw corpus into one final summary.
    pub async fn summarize(&self, source_name: &str, corpus: &str) -> Result<String> {
        let windows = split_windows(corpus, self.config.window_chars);
        if windows.is_empty() {
            bail!("nothing to summarize for {}", source_name);
        }

        info!(
            "summarizing {} in {} window(s)",
            source_name,
            windows.len()
        );

        let mut partials = Vec::with_capacity(windows.len());
        for (i, window) in windows.iter().enumerate() {
            let request = CompletionRequest {
                system: SUMMARY_SYSTEM_PROMPT.to_string(),
                user: format!("Source: {}\n\n{}", source_name, window),
                max_tokens: self.config.max_tokens,
            };
            let partial = self
                .complete_with_retry(&request)
                .await
                .with_context(|| format!("summarization window {} of {}", i + 1, windows.len()))?;
            partials.push(partial);
        }

        let concatenated = partials.join(PARTIAL_SEPARATOR);
        if partials.len() == 1 {
            return Ok(concatenated);
        }

        // Consolidation is allowed to fail; the concatenation is still a
        // usable summary.
        let request = CompletionRequest {
            system: CONSOLIDATE_SYSTEM_PROMPT.to_string(),
            user: concatenated.clone(),
            max_tokens: self.config.max_tokens,
        };
        match self.complete_with_retry(&request).await {
            Ok(merged) => Ok(merged),
            Err(e) => {
                warn!("consolidation failed, keeping partial summaries: {}", e);
                Ok(concatenated)
            }
        }
    }

    /// One completion with bounded retry on throttling.
    ///
    /// Attempt `k` failing with a rate limit sleeps `backoff_base × k`
    /// before attempt `k + 1`. Any other error aborts immediately.
    async fn complete_with_retry(&self, request: &CompletionRequest) -> Result<String> {
        for attempt in 1..=self.config.max_attempts {
            match self.service.complete(request).await {
                Ok(text) => return Ok(text),
                Err(ServiceError::Throttled) if attempt < self.config.max_attempts => {
                    let delay = backoff_delay(self.config.backoff_base_secs, attempt);
                    warn!(
                        "completion rate limited (attempt {}), backing off {:?}",
                        attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(ServiceError::Throttled) => {
                    bail!(
                        "completion still rate limited after {} attempts",
                        self.config.max_attempts
                    );
                }
                Err(e) => return Err(e).context("completion service failed"),
            }
        }
        bail!("completion attempts exhausted");
    }
}

/// Backoff before the attempt after attempt `k`: linear in `k`.
pub fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    Duration::from_secs(base_secs * attempt as u64)
}

/// Split a corpus into windows of at most `window_chars` characters,
/// preferring paragraph breaks, then sentence breaks, then a hard cut.
pub fn split_windows(text: &str, window_chars: usize) -> Vec<String> {
    let mut windows = Vec::new();
    let mut rest = text;

    while rest.len() > window_chars {
        let split_at = find_split_point(rest, window_chars);
        let (head, tail) = rest.split_at(split_at);
        let head = head.trim();
        if !head.is_empty() {
            windows.push(head.to_string());
        }
        rest = tail.trim_start();
    }

    let rest = rest.trim();
    if !rest.is_empty() {
        windows.push(rest.to_string());
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Completion service that plays back a script of responses.
    struct ScriptedService {
        responses: Mutex<VecDeque<Result<String, ServiceError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedService {
        fn new(responses: Vec<Result<String, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedService {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ServiceError::Api {
                    status: 500,
                    message: "script exhausted".into(),
                }))
        }
    }

    fn test_config() -> SummarizeConfig {
        SummarizeConfig {
            window_chars: 80_000,
            max_attempts: 5,
            backoff_base_secs: 0,
            max_tokens: 512,
        }
    }

    #[test]
    fn backoff_is_linear_in_attempt() {
        for k in 1..=4u32 {
            assert_eq!(backoff_delay(90, k), Duration::from_secs(90 * k as u64));
        }
    }

    #[test]
    fn single_window_below_ceiling() {
        let text = "x".repeat(50_000);
        let windows = split_windows(&text, 80_000);
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn window_count_for_large_corpus() {
        let text = "x".repeat(200_000);
        let windows = split_windows(&text, 80_000);
        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|w| w.len() <= 80_000));
    }

    #[test]
    fn windows_prefer_paragraph_breaks() {
        let para = "Een alinea met een redelijke hoeveelheid tekst erin. ".repeat(4);
        let text = format!("{}\n\n{}", para.trim(), para.trim());
        let windows = split_windows(&text, para.len() + 20);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0], para.trim());
    }

    #[tokio::test]
    async fn single_window_makes_one_call_no_consolidation() {
        let service = ScriptedService::new(vec![Ok("summary".into())]);
        let summarizer = Summarizer::new(service.clone(), test_config());

        let corpus = "y".repeat(50_000);
        let result = summarizer.summarize("Bron", &corpus).await.unwrap();

        assert_eq!(result, "summary");
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn three_windows_make_three_calls_plus_consolidation() {
        let service = ScriptedService::new(vec![
            Ok("deel 1".into()),
            Ok("deel 2".into()),
            Ok("deel 3".into()),
            Ok("samengevoegd".into()),
        ]);
        let summarizer = Summarizer::new(service.clone(), test_config());

        let corpus = "y".repeat(200_000);
        let result = summarizer.summarize("Bron", &corpus).await.unwrap();

        assert_eq!(result, "samengevoegd");
        assert_eq!(service.calls(), 4);
    }

    #[tokio::test]
    async fn consolidation_failure_degrades_to_concatenation() {
        let service = ScriptedService::new(vec![
            Ok("deel 1".into()),
            Ok("deel 2".into()),
            Ok("deel 3".into()),
            Err(ServiceError::Api {
                status: 500,
                message: "boom".into(),
            }),
        ]);
        let summarizer = Summarizer::new(service.clone(), test_config());

        let corpus = "y".repeat(200_000);
        let result = summarizer.summarize("Bron", &corpus).await.unwrap();

        assert_eq!(result, format!("deel 1{0}deel 2{0}deel 3", PARTIAL_SEPARATOR));
        assert_eq!(service.calls(), 4);
    }

    #[tokio::test]
    async fn throttled_then_success_retries_same_window() {
        let service = ScriptedService::new(vec![
            Err(ServiceError::Throttled),
            Err(ServiceError::Throttled),
            Ok("uiteindelijk".into()),
        ]);
        let summarizer = Summarizer::new(service.clone(), test_config());

        let result = summarizer.summarize("Bron", "korte tekst").await.unwrap();
        assert_eq!(result, "uiteindelijk");
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test]
    async fn retry_bound_is_five_attempts() {
        let service = ScriptedService::new(vec![
            Err(ServiceError::Throttled),
            Err(ServiceError::Throttled),
            Err(ServiceError::Throttled),
            Err(ServiceError::Throttled),
            Err(ServiceError::Throttled),
        ]);
        let summarizer = Summarizer::new(service.clone(), test_config());

        let result = summarizer.summarize("Bron", "korte tekst").await;
        assert!(result.is_err());
        assert_eq!(service.calls(), 5);
    }

    #[tokio::test]
    async fn non_throttle_error_is_fatal_immediately() {
        let service = ScriptedService::new(vec![Err(ServiceError::Api {
            status: 400,
            message: "bad request".into(),
        })]);
        let summarizer = Summarizer::new(service.clone(), test_config());

        let result = summarizer.summarize("Bron", "korte tekst").await;
        assert!(result.is_err());
        assert_eq!(service.calls(), 1);
    }
}
