//! Text-completion service client.
//!
//! Defines the [`CompletionService`] trait consumed by the summarization
//! orchestrator, plus the HTTP implementation against an OpenAI-style
//! `/chat/completions` endpoint. The client is single-shot: retry and
//! backoff policy belongs to the caller, which knows whether a rate limit
//! is fatal for its stage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::error::ServiceError;

/// One completion request: a fixed system instruction plus user content.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

/// Prompt-in, text-out completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;
}

/// HTTP client for an OpenAI-style chat completions API.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpCompletionClient {
    /// Build a client from configuration. The API key is resolved from the
    /// configured environment variable once, here, and stored in the client.
    pub fn from_config(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }
}

#[async_trait]
impl CompletionService for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": 0.3,
            "max_tokens": request.max_tokens,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ServiceError::Throttled);
        }

        let text = resp
            .text()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| {
                ServiceError::InvalidResponse("missing choices[0].message.content".to_string())
            })?;

        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_base(base: &str) -> HttpCompletionClient {
        HttpCompletionClient {
            client: reqwest::Client::new(),
            base_url: base.to_string(),
            model: "test".to_string(),
            api_key: None,
        }
    }

    #[test]
    fn endpoint_resolution() {
        assert_eq!(
            client_with_base("https://api.openai.com/v1").endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            client_with_base("http://localhost:1234/v1/chat/completions").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            client_with_base("http://localhost:1234/").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
    }
}
