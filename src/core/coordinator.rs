//! Parallel Generation Coordinator
//!
//! Every unit of work runs on its own task; the coordinator returns only
//! after all of them resolve (join-all). Inside a unit the fallback chain is
//! strictly sequential: each model gets one attempt bounded by the unit
//! timeout, and the first non-empty answer wins. A unit whose whole chain
//! fails yields an empty [`ProviderResult`], never an error.
//!
//! ```text
//! units ──spawn──► [Semaphore] ──► run_unit: model₀ ─fail─► model₁ ─fail─► … ─► ProviderResult
//!                                                                      │
//! join_next() ◄────────────────────────────────────────────────────────┘
//! ```

use crate::core::distributor::VarietyAllocation;
use crate::core::prompt::{self, AdReference, IntentData};
use crate::core::variety::Variety;
use crate::error::OrchestrationError;
use crate::events::{CopyEvent, EventBus};
use crate::llm::{GenerationRequest, Provider, ProviderError, ProviderRegistry, TokenUsage};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// What a unit is producing copies for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitLabel {
    Variety(Variety),
    /// Ensemble or single-model unit
    Model(String),
}

impl UnitLabel {
    pub fn variety(&self) -> Option<Variety> {
        match self {
            UnitLabel::Variety(v) => Some(*v),
            UnitLabel::Model(_) => None,
        }
    }
}

impl fmt::Display for UnitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitLabel::Variety(v) => write!(f, "{}", v),
            UnitLabel::Model(m) => write!(f, "model:{}", m),
        }
    }
}

/// One concurrent generation call with its fallback chain
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub label: UnitLabel,
    pub request: GenerationRequest,
    /// Preferred provider first; never empty when built through the constructors
    pub chain: Vec<Arc<dyn Provider>>,
}

impl WorkUnit {
    /// Unit for one variety allocation
    ///
    /// The chain is the variety's own models in table order, skipping
    /// unconfigured ones. Only when none of them is configured does the unit
    /// fall back to the registry priority order. Fails only when the registry
    /// has no configured provider at all.
    pub fn for_variety(
        registry: &ProviderRegistry,
        allocation: &VarietyAllocation,
        base: &GenerationRequest,
        intent: &IntentData,
        references: &[AdReference],
    ) -> Result<Self, OrchestrationError> {
        let config = allocation.variety.config();
        let chain = match config.model_chain().find_map(|name| registry.get(name)) {
            Some(primary) => registry.chain(primary, config.model_chain()),
            None => {
                let primary = registry.resolve(None)?;
                let order: Vec<String> = registry
                    .priority_order()
                    .iter()
                    .map(|p| p.name().to_string())
                    .collect();
                registry.chain(primary, order.iter().map(String::as_str))
            }
        };

        let prompt_text = prompt::variety_prompt(base, intent, references, &config);
        let request = base
            .for_unit(prompt_text, allocation.count)
            .with_temperature(config.temperature);

        Ok(Self {
            label: UnitLabel::Variety(allocation.variety),
            request,
            chain,
        })
    }

    /// Unit asking `provider` for `count` copies, falling back through `fallbacks`
    pub fn for_model(
        registry: &ProviderRegistry,
        provider: Arc<dyn Provider>,
        fallbacks: &[String],
        request: GenerationRequest,
    ) -> Self {
        let label = UnitLabel::Model(provider.name().to_string());
        let chain = registry.chain(provider, fallbacks.iter().map(String::as_str));
        Self { label, request, chain }
    }
}

/// How one attempt in a chain ended
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Returned this many candidates
    Produced(usize),
    /// Succeeded with an empty list
    Empty,
    Failed(ProviderError),
    TimedOut,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Produced(_))
    }

    fn describe(&self) -> String {
        match self {
            AttemptOutcome::Produced(n) => format!("produced {}", n),
            AttemptOutcome::Empty => "returned no candidates".to_string(),
            AttemptOutcome::Failed(err) => err.to_string(),
            AttemptOutcome::TimedOut => "timed out".to_string(),
        }
    }
}

/// A single model call within a unit
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub model: String,
    pub outcome: AttemptOutcome,
    /// Tokens billed, including for failed attempts
    pub usage: TokenUsage,
    pub cost: f64,
    pub elapsed: Duration,
}

/// Everything one unit produced
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    /// Model whose answer was kept; `None` when the chain was exhausted
    pub model_name: Option<String>,
    pub variety: Option<Variety>,
    pub candidates: Vec<String>,
    /// Sum over every attempt
    pub usage: TokenUsage,
    /// Sum over every attempt
    pub cost: f64,
    pub attempts: Vec<AttemptRecord>,
}

impl ProviderResult {
    /// Result for a unit that produced nothing
    pub fn exhausted(variety: Option<Variety>) -> Self {
        Self {
            model_name: None,
            variety,
            candidates: Vec::new(),
            usage: TokenUsage::default(),
            cost: 0.0,
            attempts: Vec::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.model_name.is_none()
    }

    /// Succeeded, but not on the first model
    pub fn used_fallback(&self) -> bool {
        !self.is_exhausted() && self.attempts.len() > 1
    }

    pub fn elapsed(&self) -> Duration {
        self.attempts.iter().map(|a| a.elapsed).sum()
    }
}

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on one model attempt (retries included)
    pub unit_timeout: Duration,
    /// Units allowed in flight at once
    pub max_concurrent: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            unit_timeout: Duration::from_secs(45),
            max_concurrent: 8,
        }
    }
}

/// Runs units concurrently and waits for all of them
#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    config: CoordinatorConfig,
    bus: Option<EventBus>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config, bus: None }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run every unit; results come back in unit order
    pub async fn run_all(&self, units: Vec<WorkUnit>) -> Vec<ProviderResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let varieties: Vec<Option<Variety>> = units.iter().map(|u| u.label.variety()).collect();
        let mut join_set: JoinSet<(usize, ProviderResult)> = JoinSet::new();

        for (idx, unit) in units.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.config.unit_timeout;
            let bus = self.bus.clone();

            join_set.spawn(async move {
                // The semaphore is never closed, so a permit always arrives
                let _permit = semaphore.acquire_owned().await.ok();
                (idx, run_unit(unit, timeout, bus.as_ref()).await)
            });
        }

        let mut slots: Vec<Option<ProviderResult>> = vec![None; varieties.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!(error = %e, "Unit task did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(varieties)
            .map(|(slot, variety)| slot.unwrap_or_else(|| ProviderResult::exhausted(variety)))
            .collect()
    }
}

/// Walk one unit's chain until a model returns candidates
pub async fn run_unit(unit: WorkUnit, timeout: Duration, bus: Option<&EventBus>) -> ProviderResult {
    let label = unit.label.to_string();
    let started = Instant::now();
    let mut result = ProviderResult::exhausted(unit.label.variety());

    let emit = |event: CopyEvent| {
        if let Some(bus) = bus {
            bus.emit(event);
        }
    };

    if let Some(first) = unit.chain.first() {
        emit(CopyEvent::unit_started(&label, first.name(), unit.request.count));
    }

    for (i, provider) in unit.chain.iter().enumerate() {
        if i > 0 {
            emit(CopyEvent::fallback_triggered(&label, unit.chain[i - 1].name(), provider.name()));
        }

        let attempt_started = Instant::now();
        let (outcome, usage, candidates) =
            match tokio::time::timeout(timeout, provider.generate(&unit.request)).await {
                Ok(Ok(output)) if output.candidates.is_empty() => {
                    (AttemptOutcome::Empty, output.usage, Vec::new())
                }
                Ok(Ok(output)) => (
                    AttemptOutcome::Produced(output.candidates.len()),
                    output.usage,
                    output.candidates,
                ),
                Ok(Err(err)) => {
                    let usage = err.consumed_usage();
                    (AttemptOutcome::Failed(err), usage, Vec::new())
                }
                Err(_) => (AttemptOutcome::TimedOut, TokenUsage::default(), Vec::new()),
            };

        let cost = provider.cost(usage);
        result.usage += usage;
        result.cost += cost;

        let success = outcome.is_success();
        if !success {
            debug!(
                unit = %label,
                model = provider.name(),
                outcome = %outcome.describe(),
                "Attempt unsuccessful"
            );
            emit(CopyEvent::attempt_failed(
                &label,
                provider.name(),
                &outcome.describe(),
                outcome == AttemptOutcome::TimedOut,
                usage.total(),
            ));
        }

        result.attempts.push(AttemptRecord {
            model: provider.name().to_string(),
            outcome,
            usage,
            cost,
            elapsed: attempt_started.elapsed(),
        });

        if success {
            result.model_name = Some(provider.name().to_string());
            result.candidates = candidates;
            break;
        }
    }

    emit(CopyEvent::unit_completed(
        &label,
        result.model_name.as_deref(),
        result.candidates.len(),
        result.usage.total(),
        result.cost,
        started.elapsed().as_millis() as u64,
    ));

    result
}

/// Trim and backfill per-group items toward `targets`
///
/// Each group keeps its first `target` items; the rest is surplus. Groups
/// short of their target then borrow surplus round-robin across the groups
/// that still have some. Items keep their identity, so borrowed copies
/// retain their source tags. Leftover surplus is dropped.
pub fn balance<T>(groups: Vec<Vec<T>>, targets: &[usize]) -> Vec<Vec<T>> {
    let mut kept: Vec<Vec<T>> = Vec::with_capacity(groups.len());
    let mut surplus: Vec<VecDeque<T>> = Vec::with_capacity(groups.len());

    for (i, mut group) in groups.into_iter().enumerate() {
        let target = targets.get(i).copied().unwrap_or(0);
        let extra = if group.len() > target {
            group.split_off(target)
        } else {
            Vec::new()
        };
        kept.push(group);
        surplus.push(extra.into());
    }

    let n = kept.len();
    let mut cursor = 0;
    for i in 0..n {
        let target = targets.get(i).copied().unwrap_or(0);
        while kept[i].len() < target {
            let donor = (0..n)
                .map(|k| (cursor + k) % n)
                .find(|&j| !surplus[j].is_empty());
            let Some(donor) = donor else {
                break;
            };
            if let Some(item) = surplus[donor].pop_front() {
                kept[i].push(item);
            }
            cursor = (donor + 1) % n;
        }
    }

    kept
}
