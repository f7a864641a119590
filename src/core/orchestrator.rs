//! The orchestration entry point
//!
//! ```text
//! request ─► units (variety | ensemble | single) ─► Coordinator (join-all)
//!         ─► LengthFilter ─► [balance groups] ─► Deduplicator ─► [Reranker] ─► Aggregator
//! ```
//!
//! Only configuration-level problems are returned as errors: an invalid
//! request, or no configured provider at all. Every other failure shrinks
//! the result set.

use crate::config::Config;
use crate::core::aggregator::{Aggregator, GenerationOutcome};
use crate::core::coordinator::{balance, Coordinator, CoordinatorConfig, ProviderResult, WorkUnit};
use crate::core::dedupe::Deduplicator;
use crate::core::distributor::{distribute, split_evenly};
use crate::core::filter::{GeneratedCopy, LengthFilter};
use crate::core::prompt::{self, AdReference, IntentData};
use crate::core::rerank::Reranker;
use crate::core::variety::Variety;
use crate::error::OrchestrationError;
use crate::events::{CopyEvent, EventBus};
use crate::llm::{GenerationRequest, Provider, ProviderRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How units are formed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// One unit on the resolved preferred model
    Single,
    /// A fixed total split evenly across the generation models
    Ensemble,
    /// One unit per variety in the distribution
    Variety,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 3] = [Self::Single, Self::Ensemble, Self::Variety];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Ensemble => "ensemble",
            Self::Variety => "variety",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "ensemble" | "multi" => Ok(Self::Ensemble),
            "variety" => Ok(Self::Variety),
            other => Err(format!(
                "unknown mode '{}' (expected single, ensemble or variety)",
                other
            )),
        }
    }
}

/// Everything one orchestration needs besides the mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    /// Brief, length band, tone and total count
    pub generation: GenerationRequest,
    #[serde(default)]
    pub intent: IntentData,
    #[serde(default)]
    pub references: Vec<AdReference>,
    /// Variety mode only; empty means every variety
    #[serde(default)]
    pub varieties: Vec<Variety>,
    /// Registry key tried first in single mode
    #[serde(default)]
    pub preferred_model: Option<String>,
    /// Copies kept by the reranker; defaults to `generation.count`
    #[serde(default)]
    pub top_n: Option<usize>,
    /// Overrides the configured ensemble total
    #[serde(default)]
    pub ensemble_total: Option<usize>,
    /// Overrides the configured rerank switch
    #[serde(default)]
    pub rerank: Option<bool>,
}

impl OrchestrationRequest {
    pub fn new(generation: GenerationRequest) -> Self {
        Self {
            generation,
            intent: IntentData::default(),
            references: Vec::new(),
            varieties: Vec::new(),
            preferred_model: None,
            top_n: None,
            ensemble_total: None,
            rerank: None,
        }
    }

    pub fn with_intent(mut self, intent: IntentData) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_references(mut self, references: Vec<AdReference>) -> Self {
        self.references = references;
        self
    }

    pub fn with_varieties(mut self, varieties: Vec<Variety>) -> Self {
        self.varieties = varieties;
        self
    }

    pub fn with_preferred_model(mut self, name: &str) -> Self {
        self.preferred_model = Some(name.to_string());
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }

    pub fn with_ensemble_total(mut self, total: usize) -> Self {
        self.ensemble_total = Some(total);
        self
    }

    pub fn with_rerank(mut self, enabled: bool) -> Self {
        self.rerank = Some(enabled);
        self
    }

    pub fn top_n(&self) -> usize {
        self.top_n.unwrap_or(self.generation.count)
    }

    pub fn validate(&self) -> Result<(), OrchestrationError> {
        self.generation.validate()?;
        if self.top_n == Some(0) {
            return Err(OrchestrationError::InvalidRequest("top_n must be >= 1".to_string()));
        }
        if self.ensemble_total == Some(0) {
            return Err(OrchestrationError::InvalidRequest(
                "ensemble_total must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub coordinator: CoordinatorConfig,
    pub length_tolerance: f64,
    pub dedupe_threshold: f64,
    pub ensemble_total: usize,
    pub rerank_enabled: bool,
    pub judge_model: String,
    pub judge_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            coordinator: CoordinatorConfig {
                unit_timeout: config.unit_timeout(),
                max_concurrent: config.max_concurrent_units,
            },
            length_tolerance: config.length_tolerance,
            dedupe_threshold: config.dedupe_threshold,
            ensemble_total: config.ensemble_total,
            rerank_enabled: config.rerank.enabled,
            judge_model: config.rerank.judge_model.clone(),
            judge_timeout: Duration::from_secs(config.rerank.timeout_secs),
        }
    }
}

/// Owns the registry and runs orchestrations against it
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    config: OrchestratorConfig,
    bus: Option<EventBus>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            config,
            bus: None,
        }
    }

    /// Build the registry and settings from one `Config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(ProviderRegistry::from_config(config)),
            OrchestratorConfig::from(config),
        )
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn emit(&self, event: CopyEvent) {
        if let Some(bus) = &self.bus {
            bus.emit(event);
        }
    }

    /// Generate, filter, deduplicate, optionally rerank and aggregate
    pub async fn orchestrate(
        &self,
        request: &OrchestrationRequest,
        mode: GenerationMode,
    ) -> Result<GenerationOutcome, OrchestrationError> {
        let started = Instant::now();
        request.validate()?;
        let primary = self.registry.resolve(request.preferred_model.as_deref())?;

        let (units, targets) = match mode {
            GenerationMode::Single => (vec![self.single_unit(request, primary)], None),
            GenerationMode::Variety => (self.variety_units(request)?, None),
            GenerationMode::Ensemble => {
                let (units, targets) = self.ensemble_units(request, primary);
                (units, Some(targets))
            }
        };
        debug!(
            mode = %mode,
            units = units.len(),
            count = request.generation.count,
            "Dispatching units"
        );

        let mut coordinator = Coordinator::new(self.config.coordinator.clone());
        if let Some(bus) = &self.bus {
            coordinator = coordinator.with_event_bus(bus.clone());
        }
        let results = coordinator.run_all(units).await;

        let mut aggregator = Aggregator::new();
        for result in &results {
            aggregator.add_unit(result);
        }

        let groups = self.screen_all(&results, &request.generation, &mut aggregator);
        let copies: Vec<GeneratedCopy> = match targets {
            Some(targets) => balance(groups, &targets).into_iter().flatten().collect(),
            None => groups.into_iter().flatten().collect(),
        };

        let (unique, dropped) = Deduplicator::new(self.config.dedupe_threshold).partition(copies);
        aggregator.add_duplicates(dropped.len());
        for d in &dropped {
            self.emit(CopyEvent::duplicate_dropped(&d.copy.source_model, d.similarity));
        }

        let top_n = request.top_n();
        let rerank_enabled = request.rerank.unwrap_or(self.config.rerank_enabled);
        let copies = if rerank_enabled && unique.len() > top_n {
            self.rerank(unique, &request.intent, top_n, &mut aggregator).await
        } else {
            unique
        };

        let outcome = aggregator.finish(copies, started.elapsed());
        info!(
            mode = %mode,
            copies = outcome.copies.len(),
            models = ?outcome.models_used,
            tokens = outcome.total_usage.total(),
            cost_usd = outcome.total_cost,
            elapsed_ms = outcome.elapsed_ms,
            "Orchestration finished"
        );
        self.emit(CopyEvent::orchestration_completed(
            mode.as_str(),
            outcome.copies.len(),
            outcome.total_usage.total(),
            outcome.total_cost,
            outcome.elapsed_ms,
        ));
        Ok(outcome)
    }

    fn single_unit(&self, request: &OrchestrationRequest, primary: Arc<dyn Provider>) -> WorkUnit {
        let fallbacks: Vec<String> = self
            .registry
            .priority_order()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        let prompt_text =
            prompt::ensemble_prompt(&request.generation, &request.intent, &request.references);
        let unit_request = request.generation.for_unit(prompt_text, request.generation.count);
        WorkUnit::for_model(&self.registry, primary, &fallbacks, unit_request)
    }

    fn variety_units(
        &self,
        request: &OrchestrationRequest,
    ) -> Result<Vec<WorkUnit>, OrchestrationError> {
        distribute(request.generation.count, &request.varieties)
            .iter()
            .map(|allocation| {
                WorkUnit::for_variety(
                    &self.registry,
                    allocation,
                    &request.generation,
                    &request.intent,
                    &request.references,
                )
            })
            .collect()
    }

    /// One unit per generation model, plus each unit's per-model target
    ///
    /// With no generation model configured the resolved provider carries
    /// the whole total.
    fn ensemble_units(
        &self,
        request: &OrchestrationRequest,
        primary: Arc<dyn Provider>,
    ) -> (Vec<WorkUnit>, Vec<usize>) {
        let total = request.ensemble_total.unwrap_or(self.config.ensemble_total).max(1);
        let mut providers = self.registry.generation_providers();
        if providers.is_empty() {
            providers.push(primary);
        }

        let fallbacks: Vec<String> = providers
            .iter()
            .chain(self.registry.priority_order().iter())
            .map(|p| p.name().to_string())
            .collect();
        let prompt_text =
            prompt::ensemble_prompt(&request.generation, &request.intent, &request.references);

        let shares = split_evenly(total, providers.len());
        providers
            .into_iter()
            .zip(shares)
            .filter(|(_, target)| *target > 0)
            .map(|(provider, target)| {
                let unit_request = request.generation.for_unit(prompt_text.clone(), target);
                (
                    WorkUnit::for_model(&self.registry, provider, &fallbacks, unit_request),
                    target,
                )
            })
            .unzip()
    }

    fn screen_all(
        &self,
        results: &[ProviderResult],
        base: &GenerationRequest,
        aggregator: &mut Aggregator,
    ) -> Vec<Vec<GeneratedCopy>> {
        let filter = LengthFilter::for_request(base, self.config.length_tolerance);
        results
            .iter()
            .map(|result| {
                let screened = filter.screen(result);
                aggregator.add_screened(&screened);
                for miss in &screened.misses {
                    self.emit(CopyEvent::candidate_rejected(
                        &miss.source_model,
                        miss.source_variety,
                        miss.char_count,
                        miss.tolerated,
                    ));
                }
                screened.copies
            })
            .collect()
    }

    async fn rerank(
        &self,
        copies: Vec<GeneratedCopy>,
        intent: &IntentData,
        top_n: usize,
        aggregator: &mut Aggregator,
    ) -> Vec<GeneratedCopy> {
        let candidates = copies.len();
        let Some(judge) = self.registry.get(&self.config.judge_model) else {
            warn!(
                judge = %self.config.judge_model,
                candidates,
                "Judge model not configured, skipping rerank"
            );
            return copies;
        };

        let outcome = Reranker::new(judge)
            .with_timeout(self.config.judge_timeout)
            .rerank(copies, intent, top_n)
            .await;
        aggregator.add_rerank(&outcome);
        self.emit(CopyEvent::rerank_completed(
            &outcome.judge_model,
            candidates,
            outcome.copies.len(),
            outcome.degraded,
        ));
        outcome.copies
    }
}
