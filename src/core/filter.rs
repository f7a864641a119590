//! Length/Validity Filter
//!
//! A candidate passes when its character count lies in `[min, max]`. Misses
//! get a second look against a band widened by `tolerance * (max - min)` on
//! each side; those are kept and counted as tolerated. Everything else is
//! dropped. Length is measured in Unicode scalar values after cleanup.

use crate::core::coordinator::ProviderResult;
use crate::core::variety::Variety;
use crate::llm::GenerationRequest;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Default tolerance as a fraction of the band width
pub const DEFAULT_TOLERANCE: f64 = 0.2;

/// A candidate that survived filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCopy {
    pub id: Uuid,
    pub content: String,
    pub char_count: usize,
    pub source_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_variety: Option<Variety>,
    /// Kept only through the tolerance band
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tolerated: bool,
    /// 1-based position assigned by the reranker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_reason: Option<String>,
    /// Weighted judge score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl GeneratedCopy {
    pub fn new(content: String, source_model: &str, source_variety: Option<Variety>) -> Self {
        Self {
            id: Uuid::new_v4(),
            char_count: content.chars().count(),
            content,
            source_model: source_model.to_string(),
            source_variety,
            tolerated: false,
            rank: None,
            rank_reason: None,
            score: None,
        }
    }
}

/// Result of checking one length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthVerdict {
    Accepted,
    Tolerated,
    Rejected,
}

impl LengthVerdict {
    pub fn is_kept(&self) -> bool {
        !matches!(self, LengthVerdict::Rejected)
    }
}

/// A dropped or tolerated candidate, for logging and events
#[derive(Debug, Clone, PartialEq)]
pub struct LengthMiss {
    pub char_count: usize,
    pub source_model: String,
    pub source_variety: Option<Variety>,
    pub tolerated: bool,
}

/// Copies that passed plus every out-of-band candidate seen
#[derive(Debug, Clone, Default)]
pub struct Screened {
    pub copies: Vec<GeneratedCopy>,
    pub misses: Vec<LengthMiss>,
}

impl Screened {
    pub fn tolerated(&self) -> usize {
        self.misses.iter().filter(|m| m.tolerated).count()
    }

    pub fn rejected(&self) -> usize {
        self.misses.iter().filter(|m| !m.tolerated).count()
    }
}

/// Strip whitespace, wrapping quotes and list markers models like to add
pub fn clean_candidate(text: &str) -> String {
    let mut s = text.trim();

    // "1. ", "2) ", "- ", "* "
    let digits = s.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 && digits <= 2 {
        let rest = &s[digits..];
        if let Some(r) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            s = r.trim_start();
        }
    } else if let Some(r) = s.strip_prefix("- ").or_else(|| s.strip_prefix("* ")) {
        s = r.trim_start();
    }

    for (open, close) in [('"', '"'), ('\u{201C}', '\u{201D}'), ('\'', '\'')] {
        if s.chars().count() >= 2 && s.starts_with(open) && s.ends_with(close) {
            s = &s[open.len_utf8()..s.len() - close.len_utf8()];
            s = s.trim();
            break;
        }
    }

    s.to_string()
}

/// Character-length gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthFilter {
    pub min_chars: usize,
    pub max_chars: usize,
    pub tolerance: f64,
}

impl LengthFilter {
    pub fn new(min_chars: usize, max_chars: usize) -> Self {
        Self {
            min_chars,
            max_chars,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }

    pub fn for_request(request: &GenerationRequest, tolerance: f64) -> Self {
        Self::new(request.min_chars, request.max_chars).with_tolerance(tolerance)
    }

    /// Width added to each side of the band
    pub fn slack(&self) -> f64 {
        self.max_chars.saturating_sub(self.min_chars) as f64 * self.tolerance
    }

    pub fn verdict(&self, char_count: usize) -> LengthVerdict {
        if (self.min_chars..=self.max_chars).contains(&char_count) {
            return LengthVerdict::Accepted;
        }
        let len = char_count as f64;
        let slack = self.slack();
        if len >= self.min_chars as f64 - slack && len <= self.max_chars as f64 + slack {
            LengthVerdict::Tolerated
        } else {
            LengthVerdict::Rejected
        }
    }

    /// Cleaned texts that pass, in input order
    pub fn filter(&self, texts: &[String]) -> Vec<String> {
        texts
            .iter()
            .map(|t| clean_candidate(t))
            .filter(|t| !t.is_empty() && self.verdict(t.chars().count()).is_kept())
            .collect()
    }

    /// Turn one unit's raw candidates into tagged copies
    pub fn screen(&self, result: &ProviderResult) -> Screened {
        let mut screened = Screened::default();
        let Some(model) = result.model_name.as_deref() else {
            return screened;
        };

        for raw in &result.candidates {
            let text = clean_candidate(raw);
            if text.is_empty() {
                continue;
            }
            let mut copy = GeneratedCopy::new(text, model, result.variety);

            match self.verdict(copy.char_count) {
                LengthVerdict::Accepted => screened.copies.push(copy),
                verdict => {
                    let tolerated = verdict == LengthVerdict::Tolerated;
                    debug!(
                        model,
                        variety = ?result.variety,
                        char_count = copy.char_count,
                        min = self.min_chars,
                        max = self.max_chars,
                        tolerated,
                        "Candidate outside length band"
                    );
                    screened.misses.push(LengthMiss {
                        char_count: copy.char_count,
                        source_model: model.to_string(),
                        source_variety: result.variety,
                        tolerated,
                    });
                    if tolerated {
                        copy.tolerated = true;
                        screened.copies.push(copy);
                    }
                }
            }
        }

        screened
    }
}
