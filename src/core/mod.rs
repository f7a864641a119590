//! Orchestration core
//!
//! - `variety`: closed variety set and its strategy table
//! - `distributor`: splitting a total across varieties
//! - `prompt`: intent data, references and prompt builders
//! - `coordinator`: concurrent units with per-unit fallback chains
//! - `filter`: length band with tolerance
//! - `dedupe`: Jaccard token-set deduplication
//! - `rerank`: optional judge-model reranking
//! - `aggregator`: folding everything into a `GenerationOutcome`
//! - `orchestrator`: the `orchestrate(request, mode)` entry point

pub mod aggregator;
pub mod coordinator;
pub mod dedupe;
pub mod distributor;
pub mod filter;
pub mod orchestrator;
pub mod prompt;
pub mod rerank;
pub mod variety;

pub use aggregator::{Aggregator, GenerationOutcome, ModelStats, OutcomeMetrics};
pub use coordinator::{
    balance, AttemptOutcome, AttemptRecord, Coordinator, CoordinatorConfig, ProviderResult,
    UnitLabel, WorkUnit,
};
pub use dedupe::{jaccard, token_set, Deduplicator, DroppedDuplicate};
pub use distributor::{distribute, split_evenly, VarietyAllocation};
pub use filter::{GeneratedCopy, LengthFilter, LengthVerdict, Screened};
pub use orchestrator::{GenerationMode, OrchestrationRequest, Orchestrator, OrchestratorConfig};
pub use prompt::{AdReference, IntentData};
pub use rerank::{JudgeRanking, RerankOutcome, Reranker};
pub use variety::{config_for, PersuasionFormula, ProseStyle, Trigger, Variety, VarietyConfig};
