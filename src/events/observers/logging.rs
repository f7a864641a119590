//! Logging Observer
//!
//! Maps pipeline events to `tracing` levels:
//! - INFO: UnitCompleted, RerankCompleted, OrchestrationCompleted
//! - WARN: AttemptFailed, FallbackTriggered, degraded reranks, exhausted units
//! - DEBUG: UnitStarted, CandidateRejected, DuplicateDropped

use crate::events::{CopyEvent, EventBus};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Observer that logs pipeline events using tracing
pub struct LoggingObserver {
    receiver: broadcast::Receiver<CopyEvent>,
}

impl LoggingObserver {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            receiver: bus.subscribe(),
        }
    }

    /// Log events until the channel closes
    ///
    /// ```rust,ignore
    /// tokio::spawn(observer.run());
    /// ```
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(event) => Self::log_event(&event),
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventBus closed, logging observer stopping");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Logging observer lagged, skipped {} events", count);
                }
            }
        }
    }

    /// Log a single event at the appropriate level
    pub fn log_event(event: &CopyEvent) {
        match event {
            CopyEvent::UnitStarted { unit, model, count, .. } => {
                debug!(unit = %unit, model = %model, count, "Unit started");
            }

            CopyEvent::AttemptFailed {
                unit,
                model,
                reason,
                timed_out,
                tokens_used,
                ..
            } => {
                warn!(
                    unit = %unit,
                    model = %model,
                    timed_out,
                    tokens = tokens_used,
                    reason = %reason,
                    "Provider attempt failed"
                );
            }

            CopyEvent::FallbackTriggered {
                unit,
                from_model,
                to_model,
                ..
            } => {
                warn!(
                    unit = %unit,
                    from = %from_model,
                    to = %to_model,
                    "Falling back to next model"
                );
            }

            CopyEvent::UnitCompleted {
                unit,
                model,
                candidates,
                tokens_used,
                latency_ms,
                ..
            } => match model {
                Some(model) => info!(
                    unit = %unit,
                    model = %model,
                    candidates,
                    tokens = tokens_used,
                    latency_ms,
                    "Unit completed"
                ),
                None => warn!(
                    unit = %unit,
                    tokens = tokens_used,
                    latency_ms,
                    "Unit exhausted its fallback chain"
                ),
            },

            CopyEvent::CandidateRejected {
                model,
                variety,
                char_count,
                tolerated,
                ..
            } => {
                debug!(
                    model = %model,
                    variety = ?variety,
                    char_count,
                    tolerated,
                    "Candidate outside length band"
                );
            }

            CopyEvent::DuplicateDropped { model, similarity, .. } => {
                debug!(model = %model, similarity, "Near-duplicate dropped");
            }

            CopyEvent::RerankCompleted {
                judge_model,
                candidates,
                selected,
                degraded,
                ..
            } => {
                if *degraded {
                    warn!(
                        judge = %judge_model,
                        candidates,
                        selected,
                        "Rerank failed, kept original order"
                    );
                } else {
                    info!(judge = %judge_model, candidates, selected, "Rerank completed");
                }
            }

            CopyEvent::OrchestrationCompleted {
                mode,
                copies,
                total_tokens,
                total_cost,
                elapsed_ms,
                ..
            } => {
                info!(
                    mode = %mode,
                    copies,
                    tokens = total_tokens,
                    cost_usd = %total_cost,
                    elapsed_ms,
                    "Orchestration completed"
                );
            }
        }
    }
}
