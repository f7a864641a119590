//! OpenAI-compatible chat completions provider
//!
//! Covers OpenAI itself plus every vendor exposing the same
//! `/chat/completions` shape (Gemini's OpenAI endpoint, DeepSeek, Groq,
//! OpenRouter). Keys come from a [`KeyPool`]; a 429 or quota response rotates
//! to the next key before the call is retried or given up.
//!
//! # Example
//!
//! ```rust,ignore
//! let keys = KeyPool::from_env("GEMINI_API_KEYS");
//! let gemini = OpenAiProvider::new("gemini", "gemini-2.0-flash", keys)
//!     .with_base_url(GEMINI_OPENAI_URL);
//! let completion = gemini.complete("Write a slogan", 0.8).await?;
//! ```

use crate::llm::retry::{call_with_retry, RetryConfig};
use crate::llm::{
    Completion, KeyPool, Provider, ProviderError, ProviderFuture, TokenCost, TokenUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default OpenAI API URL
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Gemini's OpenAI-compatible endpoint
pub const GEMINI_OPENAI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// DeepSeek API URL
pub const DEEPSEEK_URL: &str = "https://api.deepseek.com/v1";

/// System message sent with every completion
const SYSTEM_PROMPT: &str =
    "You are a senior performance-marketing copywriter. Follow the output requirements exactly.";

/// OpenAI-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
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

impl OpenAiProvider {
    /// Create a provider registered as `name` calling `model`
    pub fn new(name: &str, model: &str, keys: KeyPool) -> Self {
        Self {
            name: name.to_string(),
            base_url: DEFAULT_OPENAI_URL.to_string(),
            model: model.to_string(),
            max_tokens: 2048,
            timeout: Duration::from_secs(60),
            client: Client::new(),
            keys: Arc::new(keys),
            cost: Self::model_cost(model),
            retry: RetryConfig::default(),
        }
    }

    /// Set custom base URL (for proxies or compatible APIs)
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

    /// Shared key pool (exposed for diagnostics)
    pub fn key_pool(&self) -> &Arc<KeyPool> {
        &self.keys
    }

    /// USD per 1K tokens by model family
    fn model_cost(model: &str) -> TokenCost {
        match model {
            m if m.starts_with("gpt-4o-mini") => TokenCost::new(0.00015, 0.0006),
            m if m.starts_with("gpt-4o") => TokenCost::new(0.0025, 0.01),
            m if m.starts_with("gpt-4.1-mini") => TokenCost::new(0.0004, 0.0016),
            m if m.starts_with("gpt-4.1") => TokenCost::new(0.002, 0.008),
            m if m.starts_with("gemini-2.0-flash") => TokenCost::new(0.0001, 0.0004),
            m if m.starts_with("gemini-1.5-pro") => TokenCost::new(0.00125, 0.005),
            m if m.starts_with("deepseek") => TokenCost::new(0.00027, 0.0011),
            _ => TokenCost::new(0.001, 0.002),
        }
    }

    /// Try each key at most once, rotating on quota responses
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

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
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
            let body = response.text().await.unwrap_or_default();
            if is_quota_body(&body) {
                return Err(ProviderError::QuotaExhausted { keys: 1 });
            }
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let error_body: Result<ErrorResponse, _> = response.json().await;
            let message = error_body
                .map(|e| e.error.message)
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse {
                message: format!("failed to decode response body: {}", e),
                usage: TokenUsage::default(),
            })?;

        let usage = chat
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse {
                message: "response contained no message content".to_string(),
                usage,
            })?;

        debug!(
            provider = %self.name,
            tokens = usage.total(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Completion received"
        );

        Ok(Completion {
            text,
            usage,
            latency: start.elapsed(),
        })
    }
}

/// Vendors report hard quota exhaustion as a 429 with a distinctive body
fn is_quota_body(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("insufficient_quota")
        || lower.contains("resource_exhausted")
        || lower.contains("quota")
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl Provider for OpenAiProvider {
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

    fn provider(server: &MockServer, keys: &[&str]) -> OpenAiProvider {
        OpenAiProvider::new("gpt", "gpt-4o-mini", KeyPool::new(keys.iter().copied()))
            .with_base_url(&server.uri())
            .with_retry(RetryConfig::disabled())
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 8}
        })
    }

    // ==========================================
    // Configuration Tests
    // ==========================================

    #[test]
    fn test_model_cost_lookup() {
        let mini = OpenAiProvider::new("gpt", "gpt-4o-mini", KeyPool::new(["k"]));
        assert!((mini.cost_per_1k_tokens().input_per_1k - 0.00015).abs() < 1e-12);

        let unknown = OpenAiProvider::new("x", "mystery-model", KeyPool::new(["k"]));
        assert!((unknown.cost_per_1k_tokens().output_per_1k - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let p =
            OpenAiProvider::new("gpt", "gpt-4o", KeyPool::new(["k"])).with_base_url("http://x/v1/");
        assert_eq!(p.base_url, "http://x/v1");
    }

    #[tokio::test]
    async fn test_unconfigured_provider_errors() {
        let p = OpenAiProvider::new("gpt", "gpt-4o", KeyPool::new(Vec::<String>::new()));
        assert!(!p.is_configured());
        assert_eq!(
            p.complete("hi", 0.5).await.unwrap_err(),
            ProviderError::NotConfigured("gpt".to_string())
        );
    }

    #[test]
    fn test_quota_body_detection() {
        assert!(is_quota_body(r#"{"error":{"code":"insufficient_quota"}}"#));
        assert!(is_quota_body("RESOURCE_EXHAUSTED"));
        assert!(!is_quota_body("slow down"));
    }

    // ==========================================
    // Mock HTTP Server Tests
    // ==========================================

    #[tokio::test]
    async fn test_generate_success_with_mock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body(r#"["Fresh kicks", "Run further"]"#)),
            )
            .mount(&server)
            .await;

        let p = provider(&server, &["test-key"]);
        let out = p
            .generate(&GenerationRequest::new("shoes", 5, 40, 2))
            .await
            .unwrap();

        assert_eq!(out.candidates, vec!["Fresh kicks", "Run further"]);
        assert_eq!(out.usage, TokenUsage::new(12, 8));
    }

    #[tokio::test]
    async fn test_rate_limited_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).append_header("retry-after", "15"))
            .mount(&server)
            .await;

        let p = provider(&server, &["only-key"]);
        match p.complete("test", 0.0).await {
            Err(ProviderError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(15)));
            }
            other => panic!("Expected RateLimited, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quota_rotates_to_next_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer spent"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(serde_json::json!({
                    "error": {"code": "insufficient_quota", "message": "quota"}
                })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(r#"["ok"]"#)))
            .mount(&server)
            .await;

        let p = provider(&server, &["spent", "fresh"]);
        let completion = p.complete("test", 0.0).await.unwrap();

        assert_eq!(completion.text, r#"["ok"]"#);
        assert_eq!(p.key_pool().current().unwrap().key, "fresh");
    }

    #[tokio::test]
    async fn test_all_keys_out_of_quota() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("insufficient_quota"))
            .mount(&server)
            .await;

        let p = provider(&server, &["a", "b", "c"]);
        assert_eq!(
            p.complete("test", 0.0).await.unwrap_err(),
            ProviderError::QuotaExhausted { keys: 3 }
        );
    }

    #[tokio::test]
    async fn test_api_error_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": {"message": "Bad request"}})),
            )
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
    async fn test_null_content_is_parse_error_with_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": null}}],
                "usage": {"prompt_tokens": 7, "completion_tokens": 0}
            })))
            .mount(&server)
            .await;

        let p = provider(&server, &["k"]);
        match p.complete("test", 0.0).await {
            Err(ProviderError::Parse { usage, .. }) => assert_eq!(usage, TokenUsage::new(7, 0)),
            other => panic!("Expected Parse, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(r#"["back"]"#)))
            .mount(&server)
            .await;

        let p = provider(&server, &["k"]).with_retry(RetryConfig::new(
            2,
            Duration::from_millis(1),
            Duration::from_millis(5),
            0.0,
        ));
        assert_eq!(p.complete("test", 0.0).await.unwrap().text, r#"["back"]"#);
    }
}
