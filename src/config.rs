use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    /// Path to a Chrome/Chromium executable. Autodetected when absent.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Timeout for page navigations. Expired navigations are treated as
    /// soft failures, not errors.
    #[serde(default = "default_nav_timeout")]
    pub nav_timeout_secs: u64,
    /// Timeout for element waits (visibility polls, post-click settles).
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    /// Directory for best-effort debug screenshots. Disabled when absent.
    #[serde(default)]
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            nav_timeout_secs: default_nav_timeout(),
            wait_timeout_secs: default_wait_timeout(),
            screenshot_dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_nav_timeout() -> u64 {
    30
}
fn default_wait_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    /// Maximum article links followed per source per run.
    #[serde(default = "default_max_links")]
    pub max_links: usize,
    /// Extracted text shorter than this is dropped as noise.
    #[serde(default = "default_min_article_chars")]
    pub min_article_chars: usize,
    /// Per-article extracted text cap.
    #[serde(default = "default_max_article_chars")]
    pub max_article_chars: usize,
    /// Cap on the accumulated raw corpus per source.
    #[serde(default = "default_max_corpus_chars")]
    pub max_corpus_chars: usize,
    /// Pause between consecutive sources in a batch run.
    #[serde(default = "default_source_cooldown")]
    pub source_cooldown_secs: u64,
    /// Hosts routed to the SSO portal login strategy.
    #[serde(default)]
    pub sso_hosts: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_links: default_max_links(),
            min_article_chars: default_min_article_chars(),
            max_article_chars: default_max_article_chars(),
            max_corpus_chars: default_max_corpus_chars(),
            source_cooldown_secs: default_source_cooldown(),
            sso_hosts: Vec::new(),
        }
    }
}

fn default_max_links() -> usize {
    20
}
fn default_min_article_chars() -> usize {
    200
}
fn default_max_article_chars() -> usize {
    30_000
}
fn default_max_corpus_chars() -> usize {
    500_000
}
fn default_source_cooldown() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
        }
    }
}

fn default_target_chars() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizeConfig {
    /// Maximum characters per completion window.
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    /// Attempts per window before a rate limit becomes fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before attempt k+1 is `backoff_base_secs * k`.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_summary_max_tokens")]
    pub max_tokens: u32,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            window_chars: default_window_chars(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            max_tokens: default_summary_max_tokens(),
        }
    }
}

fn default_window_chars() -> usize {
    80_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base() -> u64 {
    90
}
fn default_summary_max_tokens() -> u32 {
    2048
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    /// Name of the environment variable holding the API key. Resolved once
    /// when the client is constructed, never read from inside the pipeline.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_base_url(),
            model: default_completion_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_completion_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Fixed cool-down before retrying a rate-limited batch.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            base_url: default_embedding_base_url(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            cooldown_secs: default_cooldown_secs(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    50
}
fn default_cooldown_secs() -> u64 {
    30
}
fn default_embedding_timeout() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.target_chars == 0 {
        anyhow::bail!("chunking.target_chars must be > 0");
    }

    if config.summarize.window_chars == 0 {
        anyhow::bail!("summarize.window_chars must be > 0");
    }
    if config.summarize.max_attempts == 0 {
        anyhow::bail!("summarize.max_attempts must be >= 1");
    }

    if config.crawl.max_links == 0 {
        anyhow::bail!("crawl.max_links must be >= 1");
    }
    if config.crawl.max_article_chars > config.crawl.max_corpus_chars {
        anyhow::bail!("crawl.max_article_chars must not exceed crawl.max_corpus_chars");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"/tmp/kbh.db\"\n").unwrap();
        assert_eq!(config.crawl.max_links, 20);
        assert_eq!(config.crawl.min_article_chars, 200);
        assert_eq!(config.crawl.max_corpus_chars, 500_000);
        assert_eq!(config.crawl.source_cooldown_secs, 120);
        assert_eq!(config.summarize.window_chars, 80_000);
        assert_eq!(config.summarize.max_attempts, 5);
        assert_eq!(config.summarize.backoff_base_secs, 90);
        assert_eq!(config.embedding.batch_size, 50);
        assert_eq!(config.embedding.cooldown_secs, 30);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let toml_str = r#"
            [db]
            path = "/tmp/kbh.db"
            [embedding]
            provider = "openai"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.embedding.is_enabled());
        assert!(config.embedding.dims.is_none());
        // load_config would reject this; the parse itself is fine.
    }
}
