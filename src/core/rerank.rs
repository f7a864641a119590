//! Judge-model reranking
//!
//! Scores candidates on four weighted axes and keeps the best `top_n`.
//! Any failure (call error, timeout, unusable JSON) degrades silently to the
//! first `top_n` candidates in their original order.

use crate::core::filter::GeneratedCopy;
use crate::core::prompt::{judge_prompt, IntentData};
use crate::llm::{json, Provider, TokenUsage};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const CREATIVITY_WEIGHT: f64 = 0.3;
pub const EMOTIONAL_WEIGHT: f64 = 0.3;
pub const CLARITY_WEIGHT: f64 = 0.2;
pub const CTA_WEIGHT: f64 = 0.2;

/// Judges should be consistent rather than inventive
const JUDGE_TEMPERATURE: f64 = 0.2;

/// One entry of the judge's answer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JudgeRanking {
    pub index: usize,
    #[serde(default)]
    pub creativity: f64,
    #[serde(default)]
    pub emotional: f64,
    #[serde(default)]
    pub clarity: f64,
    #[serde(default)]
    pub cta: f64,
    #[serde(default)]
    pub reason: String,
}

impl JudgeRanking {
    pub fn weighted_score(&self) -> f64 {
        self.creativity * CREATIVITY_WEIGHT
            + self.emotional * EMOTIONAL_WEIGHT
            + self.clarity * CLARITY_WEIGHT
            + self.cta * CTA_WEIGHT
    }
}

#[derive(Debug, Deserialize)]
struct JudgeResponse {
    rankings: Vec<JudgeRanking>,
}

/// What the reranker returned
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub copies: Vec<GeneratedCopy>,
    pub judge_model: String,
    /// Judge tokens, billed even on degradation
    pub usage: TokenUsage,
    pub cost: f64,
    /// Fell back to original order
    pub degraded: bool,
}

/// Reorders candidates by a judge provider's scores
#[derive(Debug, Clone)]
pub struct Reranker {
    judge: Arc<dyn Provider>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(judge: Arc<dyn Provider>) -> Self {
        Self {
            judge,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn judge_name(&self) -> &str {
        self.judge.name()
    }

    /// Keep the best `top_n` of `copies`
    ///
    /// With `top_n` or fewer candidates the judge is not called.
    pub async fn rerank(
        &self,
        copies: Vec<GeneratedCopy>,
        intent: &IntentData,
        top_n: usize,
    ) -> RerankOutcome {
        let judge_model = self.judge.name().to_string();
        if copies.len() <= top_n {
            return RerankOutcome {
                copies,
                judge_model,
                usage: TokenUsage::default(),
                cost: 0.0,
                degraded: false,
            };
        }

        let prompt = judge_prompt(&copies, intent, top_n);
        let call = self.judge.complete(&prompt, JUDGE_TEMPERATURE);
        let completion = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(err)) => {
                warn!(judge = %judge_model, error = %err, "Judge call failed");
                let usage = err.consumed_usage();
                return self.degrade(copies, top_n, usage);
            }
            Err(_) => {
                warn!(
                    judge = %judge_model,
                    timeout_secs = self.timeout.as_secs(),
                    "Judge call timed out"
                );
                return self.degrade(copies, top_n, TokenUsage::default());
            }
        };

        let usage = completion.usage;
        let rankings = match json::parse_json::<JudgeResponse>(&completion.text) {
            Ok(response) => response.rankings,
            Err(message) => {
                warn!(judge = %judge_model, error = %message, "Judge returned unusable output");
                return self.degrade(copies, top_n, usage);
            }
        };

        match apply_rankings(copies, rankings, top_n) {
            Ok(ranked) => {
                debug!(judge = %judge_model, selected = ranked.len(), "Candidates reranked");
                RerankOutcome {
                    copies: ranked,
                    judge_model,
                    usage,
                    cost: self.judge.cost(usage),
                    degraded: false,
                }
            }
            Err(copies) => {
                warn!(judge = %judge_model, "Judge rankings referenced no valid candidate");
                self.degrade(copies, top_n, usage)
            }
        }
    }

    fn degrade(
        &self,
        mut copies: Vec<GeneratedCopy>,
        top_n: usize,
        usage: TokenUsage,
    ) -> RerankOutcome {
        copies.truncate(top_n);
        RerankOutcome {
            copies,
            judge_model: self.judge.name().to_string(),
            usage,
            cost: self.judge.cost(usage),
            degraded: true,
        }
    }
}

/// Order by weighted score, judge order breaking ties
///
/// Out-of-range and repeated indices are ignored. If the judge named fewer
/// than `top_n` valid candidates the rest are filled in original order.
/// Returns the input untouched when no ranking was usable.
fn apply_rankings(
    copies: Vec<GeneratedCopy>,
    mut rankings: Vec<JudgeRanking>,
    top_n: usize,
) -> Result<Vec<GeneratedCopy>, Vec<GeneratedCopy>> {
    let mut seen = HashSet::new();
    rankings.retain(|r| r.index < copies.len() && seen.insert(r.index));
    if rankings.is_empty() {
        return Err(copies);
    }
    rankings.sort_by(|a, b| b.weighted_score().total_cmp(&a.weighted_score()));

    let mut slots: Vec<Option<GeneratedCopy>> = copies.into_iter().map(Some).collect();
    let mut ranked = Vec::with_capacity(top_n);

    for r in rankings.into_iter().take(top_n) {
        if let Some(mut copy) = slots[r.index].take() {
            copy.score = Some(r.weighted_score());
            copy.rank_reason = (!r.reason.trim().is_empty()).then(|| r.reason.trim().to_string());
            ranked.push(copy);
        }
    }
    let missing = top_n.saturating_sub(ranked.len());
    ranked.extend(slots.into_iter().flatten().take(missing));

    for (i, copy) in ranked.iter_mut().enumerate() {
        copy.rank = Some(i + 1);
    }
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockProvider, MockReply};
    use crate::llm::ProviderError;

    fn copies(n: usize) -> Vec<GeneratedCopy> {
        (0..n)
            .map(|i| GeneratedCopy::new(format!("copy number {}", i), "gpt", None))
            .collect()
    }

    fn contents(copies: &[GeneratedCopy]) -> Vec<&str> {
        copies.iter().map(|c| c.content.as_str()).collect()
    }

    fn judge(reply: MockReply) -> Reranker {
        Reranker::new(Arc::new(MockProvider::scripted("claude", vec![reply])))
    }

    // ==========================================
    // Scoring Tests
    // ==========================================

    #[test]
    fn test_weighted_score() {
        let r = JudgeRanking {
            index: 0,
            creativity: 10.0,
            emotional: 10.0,
            clarity: 0.0,
            cta: 5.0,
            reason: String::new(),
        };
        assert!((r.weighted_score() - 7.0).abs() < 1e-9);
    }

    // ==========================================
    // Rerank Tests
    // ==========================================

    #[tokio::test]
    async fn test_reorders_by_weighted_score() {
        let raw = r#"{"rankings": [
            {"index": 1, "creativity": 5, "emotional": 5, "clarity": 5, "cta": 5, "reason": "solid"},
            {"index": 3, "creativity": 9, "emotional": 9, "clarity": 9, "cta": 9, "reason": "best"}
        ]}"#;
        let out = judge(MockReply::Raw(raw.into()))
            .rerank(copies(4), &IntentData::default(), 2)
            .await;

        assert!(!out.degraded);
        assert_eq!(contents(&out.copies), vec!["copy number 3", "copy number 1"]);
        assert_eq!(out.copies[0].rank, Some(1));
        assert_eq!(out.copies[0].rank_reason.as_deref(), Some("best"));
        assert!(!out.usage.is_zero());
    }

    #[tokio::test]
    async fn test_short_rankings_are_backfilled() {
        let raw = r#"```json
{"rankings": [{"index": 2, "creativity": 8, "emotional": 8, "clarity": 8, "cta": 8}, {"index": 9}]}
```"#;
        let out = judge(MockReply::Raw(raw.into()))
            .rerank(copies(4), &IntentData::default(), 3)
            .await;

        assert_eq!(
            contents(&out.copies),
            vec!["copy number 2", "copy number 0", "copy number 1"]
        );
        assert_eq!(out.copies[2].rank, Some(3));
        assert_eq!(out.copies[1].score, None);
    }

    #[tokio::test]
    async fn test_malformed_output_degrades() {
        let out = judge(MockReply::Raw("I liked the second one best".into()))
            .rerank(copies(5), &IntentData::default(), 2)
            .await;

        assert!(out.degraded);
        assert_eq!(contents(&out.copies), vec!["copy number 0", "copy number 1"]);
        assert!(out.copies.iter().all(|c| c.rank.is_none()));
        // The completion was billed before parsing failed
        assert!(!out.usage.is_zero());
    }

    #[tokio::test]
    async fn test_call_failure_degrades() {
        let out = judge(MockReply::Fail(ProviderError::Network("reset".into())))
            .rerank(copies(3), &IntentData::default(), 1)
            .await;

        assert!(out.degraded);
        assert_eq!(contents(&out.copies), vec!["copy number 0"]);
        assert!(out.usage.is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades() {
        let out = judge(MockReply::Hang)
            .with_timeout(Duration::from_secs(5))
            .rerank(copies(3), &IntentData::default(), 2)
            .await;
        assert!(out.degraded);
        assert_eq!(out.copies.len(), 2);
    }

    #[tokio::test]
    async fn test_no_call_when_within_top_n() {
        let mock = Arc::new(MockProvider::new("claude"));
        let out = Reranker::new(mock.clone())
            .rerank(copies(3), &IntentData::default(), 3)
            .await;

        assert_eq!(mock.calls(), 0);
        assert!(!out.degraded);
        assert_eq!(out.copies.len(), 3);
    }

    #[tokio::test]
    async fn test_only_invalid_indices_degrades() {
        let raw = r#"{"rankings": [{"index": 40, "creativity": 9}]}"#;
        let out = judge(MockReply::Raw(raw.into()))
            .rerank(copies(3), &IntentData::default(), 2)
            .await;
        assert!(out.degraded);
        assert_eq!(contents(&out.copies), vec!["copy number 0", "copy number 1"]);
    }
}
