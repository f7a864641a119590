//! Anthropic messages provider
//!
//! Client for Anthropic's `/messages` API. Keys rotate through a [`KeyPool`]
//! exactly like the OpenAI-compatible provider.
//!
//! # Requirements
//!
//! - `ANTHROPIC_API_KEY` (one key or a comma-separated list)

use crate::llm::retry::{call_with_retry, RetryConfig};
use crate::llm::{
    Completion, KeyPool, Provider, ProviderError, ProviderFuture, TokenCost, TokenUsage,
};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default Anthropic API URL
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str =
    "You are a senior brand copywriter. Follow the output requirements exactly and return only JSON.";

/// Anthropic provider
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    model: String,
    max_tokens: usize,
    timeout: Duration,
    client: Client,
    keys: Arc<KeyPool>,
    cost: TokenCost,
    retry: RetryConfig,
}

impl AnthropicProvider {
    /// Create a provider registered as `name` calling `model`
    pub fn new(name: &str, model: &str, keys: KeyPool) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .unwrap_or_default();

        Self {
            name: name.to_string(),
            base_url: DEFAULT_ANTHROPIC_URL.to_string(),
            model: model.to_string(),
            max_tokens: 2048,
            timeout: Duration::from_secs(60),
            client,
            keys: Arc::new(keys),
            cost: Self::model_cost(model),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_cost(mut self, cost: TokenCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn key_pool(&self) -> &Arc<KeyPool> {
        &self.keys
    }

    /// USD per 1K tokens by model family
    fn model_cost(model: &str) -> TokenCost {
        match model {
            m if m.contains("haiku") => TokenCost::new(0.0008, 0.004),
            m if m.contains("sonnet") => TokenCost::new(0.003, 0.015),
            m if m.contains("opus") => TokenCost::new(0.015, 0.075),
            _ => TokenCost::new(0.003, 0.015),
        }
    }

    async fn send_rotating(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> Result<Completion, ProviderError> {
        let mut rate_limited = None;

        for _ in 0..self.keys.len() {
            let Some(lease) = self.keys.current() else {
                break;
            };
            match self.send_once(&lease.key, prompt, temperature).await {
                Err(err) if err.is_quota() => {
                    warn!(
                        provider = %self.name,
                        key_index = lease.index,
                        error = %err,
                        "Key hit quota, rotating"
                    );
                    self.keys.advance(lease.ticket);
                    if let ProviderError::RateLimited { .. } = err {
                        rate_limited = Some(err);
                    }
                }
                other => return other,
            }
        }

        Err(rate_limited.unwrap_or(ProviderError::QuotaExhausted {
            keys: self.keys.len(),
        }))
    }

    async fn send_once(
        &self,
        key: &str,
        prompt: &str,
        temperature: f64,
    ) -> Result<Completion, ProviderError> {
        let start = Instant::now();

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            // Anthropic caps temperature at 1.0
            temperature: temperature.min(1.0),
        };

        let url = format!("{}/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let error_body: Result<ErrorResponse, _> = response.json().await;
            let message = error_body
                .map(|e| e.error.message)
                .unwrap_or_else(|_| "Unknown error".to_string());

            // 529 is Anthropic's "overloaded"; treat like any 5xx
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response.json().await.map_err(|e| ProviderError::Parse {
            message: format!("failed to decode response body: {}", e),
            usage: TokenUsage::default(),
        })?;

        let usage = TokenUsage::new(body.usage.input_tokens, body.usage.output_tokens);

        let text: String = body
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(ProviderError::Parse {
                message: "response contained no text blocks".to_string(),
                usage,
            });
        }

        debug!(
            provider = %self.name,
            tokens = usage.total(),
            stop_reason = ?body.stop_reason,
            "Completion received"
        );

        Ok(Completion {
            text,
            usage,
            latency: start.elapsed(),
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    system: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        !self.keys.is_empty()
    }

    fn cost_per_1k_tokens(&self) -> TokenCost {
        self.cost
    }

    fn complete(&self, prompt: &str, temperature: f64) -> ProviderFuture<'_, Completion> {
        let prompt = prompt.to_string();

        Box::pin(async move {
            if self.keys.is_empty() {
                return Err(ProviderError::NotConfigured(self.name.clone()));
            }
            call_with_retry(|| self.send_rotating(&prompt, temperature), &self.retry).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationRequest;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, keys: &[&str]) -> AnthropicProvider {
        AnthropicProvider::new(
            "claude",
            "claude-sonnet-4-20250514",
            KeyPool::new(keys.iter().copied()),
        )
            .with_base_url(&server.uri())
            .with_retry(RetryConfig::disabled())
    }

    #[test]
    fn test_model_cost_by_family() {
        let haiku = AnthropicProvider::new("c", "claude-3-5-haiku-latest", KeyPool::new(["k"]));
        assert!((haiku.cost_per_1k_tokens().input_per_1k - 0.0008).abs() < 1e-12);
        let opus = AnthropicProvider::new("c", "claude-opus-4", KeyPool::new(["k"]));
        assert!((opus.cost_per_1k_tokens().output_per_1k - 0.075).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_generate_success_with_mock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "[\"Glow from within\"]"}],
                "usage": {"input_tokens": 25, "output_tokens": 9},
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let p = provider(&server, &["test-key"]);
        let out = p
            .generate(&GenerationRequest::new("serum", 5, 40, 1))
            .await
            .unwrap();

        assert_eq!(out.candidates, vec!["Glow from within"]);
        assert_eq!(out.usage, TokenUsage::new(25, 9));
    }

    #[tokio::test]
    async fn test_rate_limit_rotates_then_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).append_header("retry-after", "4"))
            .mount(&server)
            .await;

        let p = provider(&server, &["k1", "k2"]);
        match p.complete("test", 0.0).await {
            Err(ProviderError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(4)));
            }
            other => panic!("Expected RateLimited, got: {:?}", other),
        }
        // Both keys were tried once, so the cursor wrapped back to the first key
        assert_eq!(p.key_pool().ticket(), 2);
    }

    #[tokio::test]
    async fn test_api_error_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"type": "invalid_request_error", "message": "Bad request"}
            })))
            .mount(&server)
            .await;

        let p = provider(&server, &["k"]);
        assert_eq!(
            p.complete("test", 0.0).await.unwrap_err(),
            ProviderError::Api {
                status: 400,
                message: "Bad request".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_content_keeps_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [],
                "usage": {"input_tokens": 11, "output_tokens": 0}
            })))
            .mount(&server)
            .await;

        let p = provider(&server, &["k"]);
        match p.complete("test", 0.0).await {
            Err(ProviderError::Parse { usage, .. }) => assert_eq!(usage, TokenUsage::new(11, 0)),
            other => panic!("Expected Parse, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let keys = KeyPool::new(Vec::<String>::new());
        let p = AnthropicProvider::new("claude", "claude-sonnet-4", keys);
        assert!(!p.is_configured());
        assert!(matches!(
            p.complete("x", 0.2).await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
