//! Aggregation of per-unit results into a [`GenerationOutcome`]
//!
//! Usage and cost are summed over every attempt of every unit, including
//! failed ones and the judge call. `models_used` lists only models that
//! contributed a surviving copy. Elapsed time is the caller's wall clock.

use crate::core::coordinator::ProviderResult;
use crate::core::filter::{GeneratedCopy, Screened};
use crate::core::rerank::RerankOutcome;
use crate::llm::TokenUsage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-model breakdown
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelStats {
    /// Surviving copies attributed to this model
    pub copies: usize,
    pub tokens: usize,
    pub cost: f64,
}

/// Counters describing how a run went
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutcomeMetrics {
    pub units: usize,
    /// Units whose entire chain failed
    pub failed_units: usize,
    /// Units that succeeded on a fallback model
    pub fallbacks_used: usize,
    pub candidates_generated: usize,
    pub tolerated: usize,
    pub rejected: usize,
    pub duplicates_dropped: usize,
    pub reranked: bool,
    pub rerank_degraded: bool,
    pub per_model: BTreeMap<String, ModelStats>,
}

/// The result of one orchestration
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub copies: Vec<GeneratedCopy>,
    pub total_usage: TokenUsage,
    pub total_cost: f64,
    /// Distinct source models of `copies`, in first-seen order
    pub models_used: Vec<String>,
    pub elapsed_ms: u64,
    pub metrics: OutcomeMetrics,
}

impl GenerationOutcome {
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }
}

/// Folds pipeline stages into a [`GenerationOutcome`]
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    usage: TokenUsage,
    cost: f64,
    metrics: OutcomeMetrics,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_unit(&mut self, result: &ProviderResult) {
        self.usage += result.usage;
        self.cost += result.cost;
        self.metrics.units += 1;
        self.metrics.candidates_generated += result.candidates.len();
        if result.is_exhausted() {
            self.metrics.failed_units += 1;
        } else if result.used_fallback() {
            self.metrics.fallbacks_used += 1;
        }

        for attempt in &result.attempts {
            let stats = self.metrics.per_model.entry(attempt.model.clone()).or_default();
            stats.tokens += attempt.usage.total();
            stats.cost += attempt.cost;
        }
    }

    pub fn add_screened(&mut self, screened: &Screened) {
        self.metrics.tolerated += screened.tolerated();
        self.metrics.rejected += screened.rejected();
    }

    pub fn add_duplicates(&mut self, dropped: usize) {
        self.metrics.duplicates_dropped += dropped;
    }

    pub fn add_rerank(&mut self, rerank: &RerankOutcome) {
        self.usage += rerank.usage;
        self.cost += rerank.cost;
        self.metrics.reranked = !rerank.degraded;
        self.metrics.rerank_degraded = rerank.degraded;

        if !rerank.usage.is_zero() {
            let stats = self.metrics.per_model.entry(rerank.judge_model.clone()).or_default();
            stats.tokens += rerank.usage.total();
            stats.cost += rerank.cost;
        }
    }

    pub fn total_usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn finish(mut self, copies: Vec<GeneratedCopy>, elapsed: Duration) -> GenerationOutcome {
        let mut models_used: Vec<String> = Vec::new();
        for copy in &copies {
            if !models_used.contains(&copy.source_model) {
                models_used.push(copy.source_model.clone());
            }
            self.metrics
                .per_model
                .entry(copy.source_model.clone())
                .or_default()
                .copies += 1;
        }

        GenerationOutcome {
            copies,
            total_usage: self.usage,
            total_cost: self.cost,
            models_used,
            elapsed_ms: elapsed.as_millis() as u64,
            metrics: self.metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coordinator::{AttemptOutcome, AttemptRecord};
    use crate::core::variety::Variety;
    use crate::llm::ProviderError;

    fn aggregate(
        results: &[ProviderResult],
        copies: Vec<GeneratedCopy>,
        elapsed: Duration,
    ) -> GenerationOutcome {
        let mut aggregator = Aggregator::new();
        for result in results {
            aggregator.add_unit(result);
        }
        aggregator.finish(copies, elapsed)
    }

    fn attempt(
        model: &str,
        outcome: AttemptOutcome,
        usage: TokenUsage,
        cost: f64,
    ) -> AttemptRecord {
        AttemptRecord {
            model: model.to_string(),
            outcome,
            usage,
            cost,
            elapsed: Duration::from_millis(10),
        }
    }

    fn result(
        model: Option<&str>,
        attempts: Vec<AttemptRecord>,
        candidates: usize,
    ) -> ProviderResult {
        ProviderResult {
            model_name: model.map(str::to_string),
            variety: Some(Variety::Direct),
            candidates: (0..candidates).map(|i| format!("c{}", i)).collect(),
            usage: attempts.iter().map(|a| a.usage).sum(),
            cost: attempts.iter().map(|a| a.cost).sum(),
            attempts,
        }
    }

    #[test]
    fn test_usage_includes_failed_attempts() {
        let results = vec![
            result(
                Some("gpt"),
                vec![
                    attempt(
                        "gemini",
                        AttemptOutcome::Failed(ProviderError::Timeout),
                        TokenUsage::new(40, 10),
                        0.001,
                    ),
                    attempt("gpt", AttemptOutcome::Produced(2), TokenUsage::new(100, 50), 0.002),
                ],
                2,
            ),
            result(
                None,
                vec![attempt("claude", AttemptOutcome::TimedOut, TokenUsage::default(), 0.0)],
                0,
            ),
        ];

        let outcome = aggregate(&results, Vec::new(), Duration::from_millis(1500));
        assert_eq!(outcome.total_usage, TokenUsage::new(140, 60));
        assert!((outcome.total_cost - 0.003).abs() < 1e-12);
        assert_eq!(outcome.elapsed_ms, 1500);
        assert_eq!(outcome.metrics.units, 2);
        assert_eq!(outcome.metrics.failed_units, 1);
        assert_eq!(outcome.metrics.fallbacks_used, 1);
        assert_eq!(outcome.metrics.per_model["gemini"].tokens, 50);
        assert_eq!(outcome.metrics.per_model["gemini"].copies, 0);
    }

    fn produced(model: &str) -> ProviderResult {
        let usage = TokenUsage::new(1, 1);
        result(
            Some(model),
            vec![attempt(model, AttemptOutcome::Produced(1), usage, 0.0)],
            1,
        )
    }

    #[test]
    fn test_models_used_only_from_surviving_copies() {
        let results = vec![produced("gpt"), produced("claude")];
        let copies = vec![
            GeneratedCopy::new("a".into(), "claude", None),
            GeneratedCopy::new("b".into(), "claude", None),
        ];

        let outcome = aggregate(&results, copies, Duration::ZERO);
        assert_eq!(outcome.models_used, vec!["claude"]);
        assert_eq!(outcome.metrics.per_model["claude"].copies, 2);
        assert_eq!(outcome.metrics.per_model["gpt"].copies, 0);
    }

    #[test]
    fn test_rerank_usage_counts() {
        let mut agg = Aggregator::new();
        agg.add_rerank(&RerankOutcome {
            copies: Vec::new(),
            judge_model: "claude".into(),
            usage: TokenUsage::new(300, 100),
            cost: 0.0024,
            degraded: true,
        });
        let outcome = agg.finish(Vec::new(), Duration::ZERO);

        assert_eq!(outcome.total_usage.total(), 400);
        assert!(outcome.metrics.rerank_degraded);
        assert!(!outcome.metrics.reranked);
    }

    #[test]
    fn test_outcome_serializes() {
        let copies = vec![GeneratedCopy::new("hi".into(), "gpt", None)];
        let outcome = aggregate(&[], copies, Duration::ZERO);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["copies"][0]["source_model"], "gpt");
        assert_eq!(json["models_used"][0], "gpt");
        assert!(json["metrics"]["per_model"]["gpt"].is_object());
    }
}
