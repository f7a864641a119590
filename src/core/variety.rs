//! Variety Strategy Table
//!
//! Each [`Variety`] is a persuasive style with a preferred model, an ordered
//! fallback list and the style parameters used to frame its prompt. The
//! table is an exhaustive `match`, so adding a variety without a config is a
//! compile error.

use crate::llm::registry::models::{CLAUDE, DEEPSEEK, GEMINI, GPT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named persuasive style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variety {
    Emotional,
    DataDriven,
    Direct,
    Trusted,
    Storytelling,
    Urgent,
    Premium,
    ReferenceBased,
}

impl Variety {
    /// Every variety in table order
    pub const ALL: [Variety; 8] = [
        Variety::Emotional,
        Variety::DataDriven,
        Variety::Direct,
        Variety::Trusted,
        Variety::Storytelling,
        Variety::Urgent,
        Variety::Premium,
        Variety::ReferenceBased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variety::Emotional => "emotional",
            Variety::DataDriven => "data-driven",
            Variety::Direct => "direct",
            Variety::Trusted => "trusted",
            Variety::Storytelling => "storytelling",
            Variety::Urgent => "urgent",
            Variety::Premium => "premium",
            Variety::ReferenceBased => "reference-based",
        }
    }

    /// Position in table order
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn config(&self) -> VarietyConfig {
        config_for(*self)
    }
}

impl fmt::Display for Variety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variety {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('_', "-");
        Variety::ALL
            .into_iter()
            .find(|v| v.as_str() == needle)
            .ok_or_else(|| format!("unknown variety '{}'", s))
    }
}

/// Copywriting formula the prompt asks the model to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersuasionFormula {
    /// Attention, Interest, Desire, Action
    Aida,
    /// Problem, Agitate, Solve
    Pas,
    /// Before, After, Bridge
    Bab,
    /// Features, Advantages, Benefits
    Fab,
    /// Useful, Urgent, Unique, Ultra-specific
    FourU,
}

impl PersuasionFormula {
    pub fn name(&self) -> &'static str {
        match self {
            PersuasionFormula::Aida => "AIDA",
            PersuasionFormula::Pas => "PAS",
            PersuasionFormula::Bab => "Before-After-Bridge",
            PersuasionFormula::Fab => "FAB",
            PersuasionFormula::FourU => "4U",
        }
    }

    pub fn steps(&self) -> &'static str {
        match self {
            PersuasionFormula::Aida => {
                "grab attention, build interest, create desire, end with a clear action"
            }
            PersuasionFormula::Pas => {
                "name the pain point, sharpen it, then present the product as the relief"
            }
            PersuasionFormula::Bab => {
                "paint life before, life after, and the product as the bridge"
            }
            PersuasionFormula::Fab => {
                "lead with a concrete feature, state its advantage, land the personal benefit"
            }
            PersuasionFormula::FourU => {
                "be useful, urgent, unique and ultra-specific in as few words as possible"
            }
        }
    }
}

/// Psychological trigger emphasised by a variety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    Scarcity,
    Urgency,
    SocialProof,
    Authority,
    Reciprocity,
    Belonging,
    Curiosity,
    Exclusivity,
    Fomo,
    Nostalgia,
    Aspiration,
}

impl Trigger {
    pub fn cue(&self) -> &'static str {
        match self {
            Trigger::Scarcity => "limited stock or availability",
            Trigger::Urgency => "a reason to act now",
            Trigger::SocialProof => "what other customers already do or say",
            Trigger::Authority => "expert or certified backing",
            Trigger::Reciprocity => "something given first (sample, guide, bonus)",
            Trigger::Belonging => "being part of a community",
            Trigger::Curiosity => "an open loop the reader wants closed",
            Trigger::Exclusivity => "access reserved for a few",
            Trigger::Fomo => "what the reader misses by waiting",
            Trigger::Nostalgia => "a warm memory the product revives",
            Trigger::Aspiration => "the person the reader wants to become",
        }
    }
}

/// Prose register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProseStyle {
    Warm,
    Analytical,
    Punchy,
    Reassuring,
    Narrative,
    Energetic,
    Refined,
    /// Mirrors the rhythm of the supplied reference ads
    Adaptive,
}

impl ProseStyle {
    pub fn register(&self) -> &'static str {
        match self {
            ProseStyle::Warm => "warm, heartfelt, second person",
            ProseStyle::Analytical => "precise, numbers first, no hype",
            ProseStyle::Punchy => "short sentences, strong verbs, no filler",
            ProseStyle::Reassuring => "calm, credible, risk-reducing",
            ProseStyle::Narrative => "a micro-story with a character and a turn",
            ProseStyle::Energetic => "high energy, countdown feel, exclamation allowed",
            ProseStyle::Refined => "understated, elegant, sensory detail",
            ProseStyle::Adaptive => {
                "match the structure and rhythm of the reference ads without copying them"
            }
        }
    }
}

/// Generation parameters for one variety
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VarietyConfig {
    pub variety: Variety,
    /// Registry key tried first
    pub preferred_model: &'static str,
    /// Registry keys tried in order after the preferred model
    pub fallback_models: &'static [&'static str],
    pub formula: PersuasionFormula,
    pub triggers: &'static [Trigger],
    pub style: ProseStyle,
    pub temperature: f64,
}

impl VarietyConfig {
    /// Preferred model followed by fallbacks
    pub fn model_chain(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.preferred_model).chain(self.fallback_models.iter().copied())
    }
}

/// Look up the strategy for a variety
pub fn config_for(variety: Variety) -> VarietyConfig {
    match variety {
        Variety::Emotional => VarietyConfig {
            variety,
            preferred_model: CLAUDE,
            fallback_models: &[GPT, GEMINI],
            formula: PersuasionFormula::Pas,
            triggers: &[Trigger::Belonging, Trigger::Aspiration, Trigger::Nostalgia],
            style: ProseStyle::Warm,
            temperature: 0.95,
        },
        Variety::DataDriven => VarietyConfig {
            variety,
            preferred_model: GPT,
            fallback_models: &[CLAUDE, DEEPSEEK],
            formula: PersuasionFormula::Fab,
            triggers: &[Trigger::Authority, Trigger::SocialProof],
            style: ProseStyle::Analytical,
            temperature: 0.6,
        },
        Variety::Direct => VarietyConfig {
            variety,
            preferred_model: GPT,
            fallback_models: &[GEMINI, CLAUDE],
            formula: PersuasionFormula::FourU,
            triggers: &[Trigger::Curiosity, Trigger::Urgency],
            style: ProseStyle::Punchy,
            temperature: 0.7,
        },
        Variety::Trusted => VarietyConfig {
            variety,
            preferred_model: CLAUDE,
            fallback_models: &[GPT, DEEPSEEK],
            formula: PersuasionFormula::Aida,
            triggers: &[Trigger::Authority, Trigger::SocialProof, Trigger::Reciprocity],
            style: ProseStyle::Reassuring,
            temperature: 0.7,
        },
        Variety::Storytelling => VarietyConfig {
            variety,
            preferred_model: CLAUDE,
            fallback_models: &[GEMINI, GPT],
            formula: PersuasionFormula::Bab,
            triggers: &[Trigger::Nostalgia, Trigger::Belonging, Trigger::Curiosity],
            style: ProseStyle::Narrative,
            temperature: 1.0,
        },
        Variety::Urgent => VarietyConfig {
            variety,
            preferred_model: GEMINI,
            fallback_models: &[GPT, DEEPSEEK],
            formula: PersuasionFormula::Aida,
            triggers: &[Trigger::Scarcity, Trigger::Urgency, Trigger::Fomo],
            style: ProseStyle::Energetic,
            temperature: 0.85,
        },
        Variety::Premium => VarietyConfig {
            variety,
            preferred_model: CLAUDE,
            fallback_models: &[GPT],
            formula: PersuasionFormula::Fab,
            triggers: &[Trigger::Exclusivity, Trigger::Aspiration],
            style: ProseStyle::Refined,
            temperature: 0.8,
        },
        Variety::ReferenceBased => VarietyConfig {
            variety,
            preferred_model: GEMINI,
            fallback_models: &[CLAUDE, GPT],
            formula: PersuasionFormula::Aida,
            triggers: &[Trigger::SocialProof, Trigger::Curiosity],
            style: ProseStyle::Adaptive,
            temperature: 0.8,
        },
    }
}
