//! Provider Abstraction
//!
//! Uniform async contract over each LLM vendor. The orchestration core only
//! ever talks to `dyn Provider`; vendor wire formats live in the submodules.
//!
//! # Architecture
//!
//! ```text
//! Coordinator → ProviderRegistry → dyn Provider → [OpenAiProvider, AnthropicProvider]
//!                                        │
//!                                        └─ KeyPool (rotation) + call_with_retry (backoff)
//! ```

pub mod anthropic;
pub mod json;
pub mod key_pool;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod retry;

use crate::error::OrchestrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use key_pool::KeyPool;
pub use registry::ProviderRegistry;
pub use retry::{call_with_retry, RetryConfig};

/// Boxed future returned by provider calls (keeps the trait object-safe)
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Writing tone requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Friendly,
    Professional,
    Playful,
    Luxurious,
    Urgent,
    Casual,
    Emotional,
}

impl Tone {
    /// All tones in display order
    pub const ALL: [Tone; 7] = [
        Tone::Friendly,
        Tone::Professional,
        Tone::Playful,
        Tone::Luxurious,
        Tone::Urgent,
        Tone::Casual,
        Tone::Emotional,
    ];

    /// Stable identifier used in config files and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Friendly => "friendly",
            Tone::Professional => "professional",
            Tone::Playful => "playful",
            Tone::Luxurious => "luxurious",
            Tone::Urgent => "urgent",
            Tone::Casual => "casual",
            Tone::Emotional => "emotional",
        }
    }

    /// One-line writing guidance injected into the prompt
    pub fn guidance(&self) -> &'static str {
        match self {
            Tone::Friendly => "warm and approachable, like a helpful friend",
            Tone::Professional => "polished, precise and credible",
            Tone::Playful => "light, witty and a little cheeky",
            Tone::Luxurious => "refined, understated and exclusive",
            Tone::Urgent => "energetic and time-sensitive without sounding spammy",
            Tone::Casual => "relaxed and conversational",
            Tone::Emotional => "heartfelt and evocative",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Tone::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| format!("unknown tone '{}'", s))
    }
}

/// A single generation call as seen by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Fully built prompt body (brief, style framing, context)
    pub prompt_text: String,
    /// Minimum accepted character count per candidate
    pub min_chars: usize,
    /// Maximum accepted character count per candidate
    pub max_chars: usize,
    /// Requested tone, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
    /// Number of candidates to produce
    pub count: usize,
    /// Free-form style hints appended to the output requirements
    #[serde(default)]
    pub style_hints: Vec<String>,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    0.9
}

impl GenerationRequest {
    /// Create a request with no tone or style hints
    pub fn new(
        prompt_text: impl Into<String>,
        min_chars: usize,
        max_chars: usize,
        count: usize,
    ) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            min_chars,
            max_chars,
            tone: None,
            count,
            style_hints: Vec::new(),
            temperature: default_temperature(),
        }
    }

    /// Set the tone
    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = Some(tone);
        self
    }

    /// Append style hints
    pub fn with_style_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.style_hints.extend(hints.into_iter().map(Into::into));
        self
    }

    /// Set the sampling temperature (clamped to 0.0..=2.0)
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Check `min_chars <= max_chars` and `count >= 1`
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.count == 0 {
            return Err(OrchestrationError::InvalidRequest(
                "count must be >= 1".to_string(),
            ));
        }
        if self.min_chars > self.max_chars {
            return Err(OrchestrationError::InvalidRequest(format!(
                "min_chars ({}) must be <= max_chars ({})",
                self.min_chars, self.max_chars
            )));
        }
        Ok(())
    }

    /// Derive a request for one unit of work: same constraints, new prompt and count
    pub fn for_unit(&self, prompt_text: String, count: usize) -> Self {
        Self {
            prompt_text,
            count,
            ..self.clone()
        }
    }

    /// Render the prompt sent over the wire, including output requirements
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.prompt_text.len() + 512);
        out.push_str(self.prompt_text.trim_end());
        out.push_str("\n\n## Output requirements\n");
        out.push_str(&format!("- Write exactly {} distinct copies.\n", self.count));
        out.push_str(&format!(
            "- Each copy must be between {} and {} characters long.\n",
            self.min_chars, self.max_chars
        ));
        if let Some(tone) = self.tone {
            out.push_str(&format!("- Tone: {} ({}).\n", tone, tone.guidance()));
        }
        for hint in &self.style_hints {
            out.push_str(&format!("- {}\n", hint));
        }
        out.push_str(&format!(
            "- Respond with a JSON array of exactly {} strings and nothing else.\n",
            self.count
        ));
        out
    }
}

/// Token usage breakdown for cost calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt/input tokens
    pub prompt_tokens: usize,
    /// Completion/output tokens
    pub completion_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens (prompt + completion)
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), Add::add)
    }
}

/// Cost per 1K tokens (prompt, completion) in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenCost {
    /// Cost per 1K prompt tokens
    pub input_per_1k: f64,
    /// Cost per 1K completion tokens
    pub output_per_1k: f64,
}

impl TokenCost {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Calculate cost for given token usage
    pub fn calculate(&self, usage: TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_1k / 1000.0)
            + (usage.completion_tokens as f64 * self.output_per_1k / 1000.0)
    }
}

/// Raw text completion from a vendor
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Tokens billed for this call
    pub usage: TokenUsage,
    /// Wall-clock latency of the call
    pub latency: Duration,
}

/// Parsed output of [`Provider::generate`]
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOutput {
    /// Candidate copy texts in the order the model produced them
    pub candidates: Vec<String>,
    /// Tokens billed for this call
    pub usage: TokenUsage,
    /// Wall-clock latency of the call
    pub latency: Duration,
}

/// Errors from a single provider attempt
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// 429 from the vendor; retryable after the hinted delay
    #[error(
        "rate limited{}",
        .retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default()
    )]
    RateLimited {
        /// Suggested delay from the Retry-After header
        retry_after: Option<Duration>,
    },

    /// Every credential in the key pool is out of quota
    #[error("quota exhausted for all {keys} key(s)")]
    QuotaExhausted {
        /// Number of keys that were tried
        keys: usize,
    },

    /// The request did not complete in time
    #[error("request timed out")]
    Timeout,

    /// Connectivity failure
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the vendor
        message: String,
    },

    /// The model answered but its output could not be parsed
    #[error("unparseable model output: {message}")]
    Parse {
        /// What went wrong
        message: String,
        /// Tokens already billed for the unusable completion
        usage: TokenUsage,
    },

    /// The provider has no credentials
    #[error("provider '{0}' is not configured")]
    NotConfigured(String),
}

impl ProviderError {
    /// Retryable errors: RateLimited, Timeout, Network, 5xx
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout
            | ProviderError::Network(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::QuotaExhausted { .. }
            | ProviderError::Parse { .. }
            | ProviderError::NotConfigured(_) => false,
        }
    }

    /// Whether this error means the current credential is spent
    pub fn is_quota(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::QuotaExhausted { .. } => true,
            ProviderError::Api { status, .. } => *status == 402 || *status == 429,
            _ => false,
        }
    }

    /// Tokens consumed before the failure (non-zero only for billed parse failures)
    pub fn consumed_usage(&self) -> TokenUsage {
        match self {
            ProviderError::Parse { usage, .. } => *usage,
            _ => TokenUsage::default(),
        }
    }
}

/// Uniform contract implemented once per LLM vendor
///
/// Implementors supply [`complete`](Provider::complete); the default
/// [`generate`](Provider::generate) renders the request, asks for a JSON
/// array and parses it with [`json::parse_candidates`].
pub trait Provider: Send + Sync {
    /// Registry key (e.g. "claude", "gemini")
    fn name(&self) -> &str;

    /// Vendor model identifier (e.g. "claude-sonnet-4-20250514")
    fn model_name(&self) -> &str;

    /// Whether credentials are present
    fn is_configured(&self) -> bool;

    /// Price per 1K tokens
    fn cost_per_1k_tokens(&self) -> TokenCost;

    /// Cost of the given usage in USD
    fn cost(&self, usage: TokenUsage) -> f64 {
        self.cost_per_1k_tokens().calculate(usage)
    }

    /// Send a raw prompt and return the model's text
    fn complete(&self, prompt: &str, temperature: f64) -> ProviderFuture<'_, Completion>;

    /// Generate `request.count` candidate copies
    fn generate(&self, request: &GenerationRequest) -> ProviderFuture<'_, ProviderOutput> {
        let prompt = request.render();
        let temperature = request.temperature;

        Box::pin(async move {
            let completion = self.complete(&prompt, temperature).await?;
            let candidates =
                json::parse_candidates(&completion.text).map_err(|message| ProviderError::Parse {
                    message,
                    usage: completion.usage,
                })?;

            Ok(ProviderOutput {
                candidates,
                usage: completion.usage,
                latency: completion.latency,
            })
        })
    }
}

impl fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .field("model", &self.model_name())
            .field("configured", &self.is_configured())
            .finish()
    }
}
