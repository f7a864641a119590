//! Varietal - Multi-Model Marketing Copy Orchestration
//!
//! Fans a copy brief out across several LLM backends and turns what comes
//! back into a ranked, deduplicated set of candidates:
//!
//! - **Variety strategies**: each persuasive style has a preferred model,
//!   ordered fallbacks and its own prompt framing
//! - **Join-all coordination**: units run concurrently; a unit that exhausts
//!   its fallback chain contributes nothing instead of failing the run
//! - **Post-processing**: length band with tolerance, Jaccard dedupe and an
//!   optional judge-model rerank
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use varietal::{Config, GenerationMode, GenerationRequest, OrchestrationRequest, Orchestrator};
//!
//! # async fn run() -> Result<(), varietal::OrchestrationError> {
//! let orchestrator = Orchestrator::from_config(&Config::default());
//! let request = OrchestrationRequest::new(
//!     GenerationRequest::new("Launch ad for a vegan protein bar", 40, 120, 16),
//! );
//!
//! let outcome = orchestrator.orchestrate(&request, GenerationMode::Variety).await?;
//! for copy in &outcome.copies {
//!     println!("[{}] {}", copy.source_model, copy.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod llm;

// Re-export commonly used items at crate root
pub use cache::RequestCache;
pub use config::{Config, ConfigError};
pub use core::{
    distribute, GeneratedCopy, GenerationMode, GenerationOutcome, IntentData, OrchestrationRequest,
    Orchestrator, OrchestratorConfig, Variety,
};
pub use error::OrchestrationError;
pub use events::observers::{LoggingObserver, MetricsObserver};
pub use events::{CopyEvent, EventBus};
pub use llm::{GenerationRequest, Provider, ProviderError, ProviderRegistry, TokenUsage, Tone};
