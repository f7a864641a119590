//! Scripted provider for tests, benches and offline runs
//!
//! Without a script the mock "echoes": it returns exactly `request.count`
//! copies whose tokens are unique to the call, sized to the middle of the
//! requested length band. A script makes each call consume the next reply
//! (cycling), which is how tests stage failures and fallbacks.

use crate::llm::{
    json, Completion, GenerationRequest, Provider, ProviderError, ProviderFuture, ProviderOutput,
    TokenCost, TokenUsage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return `count` synthetic copies that fit the length band
    Echo,
    /// Return these candidates verbatim
    Copies(Vec<String>),
    /// Return raw model text (parsed as JSON by `generate`)
    Raw(String),
    /// Fail with this error
    Fail(ProviderError),
    /// Never answer
    Hang,
}

/// Provider double with call accounting
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    model: String,
    configured: bool,
    script: Vec<MockReply>,
    usage: TokenUsage,
    cost: TokenCost,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    /// Configured echo provider named `name`
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            model: format!("{}-mock", name),
            configured: true,
            script: Vec::new(),
            usage: TokenUsage::new(100, 50),
            cost: TokenCost::new(0.001, 0.002),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Provider that consumes `replies` in order, cycling
    pub fn scripted(name: &str, replies: Vec<MockReply>) -> Self {
        Self {
            script: replies,
            ..Self::new(name)
        }
    }

    /// Provider whose every call fails with `error`
    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self::scripted(name, vec![MockReply::Fail(error)])
    }

    /// Mark credentials as missing
    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Tokens reported per successful call
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_cost(mut self, cost: TokenCost) -> Self {
        self.cost = cost;
        self
    }

    /// Simulated network latency per call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self, prompt: &str) -> (usize, MockReply) {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let reply = if self.script.is_empty() {
            MockReply::Echo
        } else {
            self.script[idx % self.script.len()].clone()
        };
        (idx, reply)
    }

    /// `count` copies with call-unique tokens, each `target` chars long
    ///
    /// Only whole words are added; the last word is padded with dots, so no
    /// token is shared between copies. A band too narrow for one word gets a
    /// truncated word.
    fn echo_copies(&self, call: usize, count: usize, min: usize, max: usize) -> Vec<String> {
        let target = ((min + max) / 2).max(1);
        (0..count)
            .map(|i| {
                let mut text = String::with_capacity(target);
                let mut len = 0;
                for word in 0.. {
                    let token = format!("{}{}x{}w{}", self.name, call, i, word);
                    let needed = token.chars().count() + usize::from(len > 0);
                    if len > 0 && len + needed > target {
                        break;
                    }
                    if len > 0 {
                        text.push(' ');
                    }
                    text.push_str(&token);
                    len += needed;
                    if len >= target {
                        break;
                    }
                }
                if len > target {
                    return text.chars().take(target).collect();
                }
                text.extend(std::iter::repeat('.').take(target - len));
                text
            })
            .collect()
    }

    async fn pause(&self) {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn cost_per_1k_tokens(&self) -> TokenCost {
        self.cost
    }

    fn complete(&self, prompt: &str, _temperature: f64) -> ProviderFuture<'_, Completion> {
        let (call, reply) = self.next_reply(prompt);
        let usage = self.usage;

        Box::pin(async move {
            self.pause().await;
            let delay = self.delay.unwrap_or_default();
            let text = match reply {
                MockReply::Echo => serde_json::to_string(&self.echo_copies(call, 1, 20, 40))
                    .unwrap_or_default(),
                MockReply::Copies(copies) => serde_json::to_string(&copies).unwrap_or_default(),
                MockReply::Raw(text) => text,
                MockReply::Fail(err) => return Err(err),
                MockReply::Hang => std::future::pending().await,
            };
            Ok(Completion {
                text,
                usage,
                latency: delay,
            })
        })
    }

    fn generate(&self, request: &GenerationRequest) -> ProviderFuture<'_, ProviderOutput> {
        let (call, reply) = self.next_reply(&request.render());
        let usage = self.usage;
        let (count, min, max) = (request.count, request.min_chars, request.max_chars);

        Box::pin(async move {
            self.pause().await;
            let candidates = match reply {
                MockReply::Echo => self.echo_copies(call, count, min, max),
                MockReply::Copies(copies) => copies,
                MockReply::Raw(text) => json::parse_candidates(&text)
                    .map_err(|message| ProviderError::Parse { message, usage })?,
                MockReply::Fail(err) => return Err(err),
                MockReply::Hang => std::future::pending().await,
            };
            Ok(ProviderOutput {
                candidates,
                usage,
                latency: self.delay.unwrap_or_default(),
            })
        })
    }
}
