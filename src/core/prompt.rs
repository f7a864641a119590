//! Prompt construction
//!
//! Builds the prompt body for each unit of work from the caller's brief, the
//! upstream [`IntentData`] and the variety's style parameters. The output
//! requirements (count, length band, JSON shape) are appended later by
//! [`GenerationRequest::render`].

use crate::core::filter::GeneratedCopy;
use crate::core::variety::{Variety, VarietyConfig};
use crate::llm::{GenerationRequest, Tone};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Reference ads included in a prompt at most
pub const MAX_REFERENCES: usize = 5;

/// Structured facts extracted upstream from the user's free text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentData {
    pub product_name: String,
    pub target_audience: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
    pub benefits: Vec<String>,
    pub keywords: Vec<String>,
    pub emotional_triggers: Vec<String>,
}

impl IntentData {
    pub fn new(product_name: &str) -> Self {
        Self {
            product_name: product_name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.target_audience = audience.to_string();
        self
    }

    pub fn with_benefits<I, S>(mut self, benefits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.benefits.extend(benefits.into_iter().map(Into::into));
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Markdown block listing whatever facts are present
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let mut line = |label: &str, value: &str| {
            if !value.trim().is_empty() {
                let _ = writeln!(out, "- {}: {}", label, value.trim());
            }
        };
        line("Product", &self.product_name);
        line("Audience", &self.target_audience);
        line("Tone", self.tone.map(|t| t.as_str()).unwrap_or_default());
        line("Benefits", &self.benefits.join("; "));
        line("Keywords", &self.keywords.join(", "));
        line("Emotional triggers", &self.emotional_triggers.join(", "));
        out
    }
}

/// An existing ad used as style context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdReference {
    pub headline: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub platform: String,
}

impl AdReference {
    pub fn new(headline: &str, body: &str, platform: &str) -> Self {
        Self {
            headline: headline.to_string(),
            body: body.to_string(),
            platform: platform.to_string(),
        }
    }
}

fn push_brief(out: &mut String, base: &GenerationRequest, intent: &IntentData) {
    out.push_str("You are writing advertising copy.\n\n## Brief\n");
    out.push_str(base.prompt_text.trim());
    out.push('\n');

    if !intent.is_empty() {
        out.push_str("\n## Product facts\n");
        out.push_str(&intent.summary());
    }
}

fn push_references(out: &mut String, references: &[AdReference]) {
    if references.is_empty() {
        return;
    }
    out.push_str("\n## Reference ads (for structure only, never copy wording)\n");
    for (i, r) in references.iter().take(MAX_REFERENCES).enumerate() {
        let _ = write!(out, "{}. {}", i + 1, r.headline.trim());
        if !r.body.trim().is_empty() {
            let _ = write!(out, " | {}", r.body.trim());
        }
        if !r.platform.trim().is_empty() {
            let _ = write!(out, " [{}]", r.platform.trim());
        }
        out.push('\n');
    }
}

/// Prompt body for one variety unit
pub fn variety_prompt(
    base: &GenerationRequest,
    intent: &IntentData,
    references: &[AdReference],
    config: &VarietyConfig,
) -> String {
    let mut out = String::with_capacity(1024);
    push_brief(&mut out, base, intent);

    let _ = write!(
        out,
        "\n## Style: {}\n- Formula: {} ({})\n- Register: {}\n",
        config.variety,
        config.formula.name(),
        config.formula.steps(),
        config.style.register()
    );
    for trigger in config.triggers {
        let _ = writeln!(out, "- Lean on {}", trigger.cue());
    }

    if config.variety == Variety::ReferenceBased {
        push_references(&mut out, references);
    }
    out
}

/// Prompt body for one ensemble-model unit
pub fn ensemble_prompt(
    base: &GenerationRequest,
    intent: &IntentData,
    references: &[AdReference],
) -> String {
    let mut out = String::with_capacity(1024);
    push_brief(&mut out, base, intent);
    out.push_str("\nMake every copy take a clearly different angle.\n");
    push_references(&mut out, references);
    out
}

/// Instructions for the judge model
pub fn judge_prompt(copies: &[GeneratedCopy], intent: &IntentData, top_n: usize) -> String {
    let mut out = String::with_capacity(256 + copies.len() * 128);
    out.push_str("You are a creative director judging advertising copy.\n");
    if !intent.is_empty() {
        out.push_str("\n## Product facts\n");
        out.push_str(&intent.summary());
    }

    out.push_str("\n## Candidates\n");
    for (i, c) in copies.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}", i, c.content);
    }

    let _ = write!(
        out,
        "\n## Task\nScore every candidate from 0 to 10 on creativity, emotional impact, \
         clarity and call-to-action strength. Return the best {} as JSON:\n\
         {{\"rankings\": [{{\"index\": 0, \"creativity\": 8, \"emotional\": 7, \"clarity\": 9, \
         \"cta\": 6, \"reason\": \"one line\"}}]}}\n\
         Order rankings best first and respond with JSON only.\n",
        top_n
    );
    out
}
