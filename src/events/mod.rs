//! Event-Driven Observability for the generation pipeline
//!
//! Structured events describing each orchestration:
//! - Unit lifecycle (start, failed attempts, fallbacks, completion)
//! - Filter and dedupe decisions
//! - Reranking and the final outcome
//!
//! # Architecture
//!
//! Events are emitted via an `EventBus` which uses a broadcast channel.
//! Multiple observers can subscribe to receive all events:
//!
//! ```text
//! Orchestrator → EventBus → [LoggingObserver, MetricsObserver, ...]
//! ```

pub mod bus;
pub mod observers;

use crate::core::variety::Variety;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// All events emitted during orchestration
///
/// Tagged with their type for JSON serialization. Candidate text is never
/// carried, only counts and tags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CopyEvent {
    /// A unit of work was dispatched
    UnitStarted {
        /// Unit label (variety name or ensemble model)
        unit: String,
        /// First model in the unit's chain
        model: String,
        /// Candidates requested
        count: usize,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// One model in a unit's chain failed or returned nothing
    AttemptFailed {
        unit: String,
        model: String,
        reason: String,
        timed_out: bool,
        /// Tokens billed before the failure
        tokens_used: usize,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A unit moved on to the next model in its chain
    FallbackTriggered {
        unit: String,
        from_model: String,
        to_model: String,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A unit finished (possibly with no candidates)
    UnitCompleted {
        unit: String,
        /// Model that produced the candidates; absent when exhausted
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        candidates: usize,
        tokens_used: usize,
        cost: f64,
        latency_ms: u64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A candidate fell outside the strict length band
    CandidateRejected {
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        variety: Option<Variety>,
        char_count: usize,
        /// Kept through the tolerance band
        tolerated: bool,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A near-duplicate was removed
    DuplicateDropped {
        model: String,
        similarity: f64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// The judge model ran (or was skipped after failing)
    RerankCompleted {
        judge_model: String,
        candidates: usize,
        selected: usize,
        /// Judge failed and original order was kept
        degraded: bool,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// An orchestration call returned
    OrchestrationCompleted {
        mode: String,
        copies: usize,
        total_tokens: usize,
        total_cost: f64,
        elapsed_ms: u64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },
}

impl CopyEvent {
    pub fn unit_started(unit: &str, model: &str, count: usize) -> Self {
        Self::UnitStarted {
            unit: unit.to_string(),
            model: model.to_string(),
            count,
            timestamp: SystemTime::now(),
        }
    }

    pub fn attempt_failed(
        unit: &str,
        model: &str,
        reason: &str,
        timed_out: bool,
        tokens_used: usize,
    ) -> Self {
        Self::AttemptFailed {
            unit: unit.to_string(),
            model: model.to_string(),
            reason: reason.to_string(),
            timed_out,
            tokens_used,
            timestamp: SystemTime::now(),
        }
    }

    pub fn fallback_triggered(unit: &str, from_model: &str, to_model: &str) -> Self {
        Self::FallbackTriggered {
            unit: unit.to_string(),
            from_model: from_model.to_string(),
            to_model: to_model.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn unit_completed(
        unit: &str,
        model: Option<&str>,
        candidates: usize,
        tokens_used: usize,
        cost: f64,
        latency_ms: u64,
    ) -> Self {
        Self::UnitCompleted {
            unit: unit.to_string(),
            model: model.map(str::to_string),
            candidates,
            tokens_used,
            cost,
            latency_ms,
            timestamp: SystemTime::now(),
        }
    }

    pub fn candidate_rejected(
        model: &str,
        variety: Option<Variety>,
        char_count: usize,
        tolerated: bool,
    ) -> Self {
        Self::CandidateRejected {
            model: model.to_string(),
            variety,
            char_count,
            tolerated,
            timestamp: SystemTime::now(),
        }
    }

    pub fn duplicate_dropped(model: &str, similarity: f64) -> Self {
        Self::DuplicateDropped {
            model: model.to_string(),
            similarity,
            timestamp: SystemTime::now(),
        }
    }

    pub fn rerank_completed(
        judge_model: &str,
        candidates: usize,
        selected: usize,
        degraded: bool,
    ) -> Self {
        Self::RerankCompleted {
            judge_model: judge_model.to_string(),
            candidates,
            selected,
            degraded,
            timestamp: SystemTime::now(),
        }
    }

    pub fn orchestration_completed(
        mode: &str,
        copies: usize,
        total_tokens: usize,
        total_cost: f64,
        elapsed_ms: u64,
    ) -> Self {
        Self::OrchestrationCompleted {
            mode: mode.to_string(),
            copies,
            total_tokens,
            total_cost,
            elapsed_ms,
            timestamp: SystemTime::now(),
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UnitStarted { .. } => "UnitStarted",
            Self::AttemptFailed { .. } => "AttemptFailed",
            Self::FallbackTriggered { .. } => "FallbackTriggered",
            Self::UnitCompleted { .. } => "UnitCompleted",
            Self::CandidateRejected { .. } => "CandidateRejected",
            Self::DuplicateDropped { .. } => "DuplicateDropped",
            Self::RerankCompleted { .. } => "RerankCompleted",
            Self::OrchestrationCompleted { .. } => "OrchestrationCompleted",
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        match self {
            Self::UnitStarted { timestamp, .. }
            | Self::AttemptFailed { timestamp, .. }
            | Self::FallbackTriggered { timestamp, .. }
            | Self::UnitCompleted { timestamp, .. }
            | Self::CandidateRejected { timestamp, .. }
            | Self::DuplicateDropped { timestamp, .. }
            | Self::RerankCompleted { timestamp, .. }
            | Self::OrchestrationCompleted { timestamp, .. } => *timestamp,
        }
    }
}

/// Serde module for SystemTime serialization (millis since epoch)
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

pub use bus::EventBus;

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================
    // Event Creation Tests
    // ==========================================

    #[test]
    fn test_unit_completed_creation() {
        let event = CopyEvent::unit_completed("urgent", Some("gemini"), 3, 420, 0.002, 812);

        match event {
            CopyEvent::UnitCompleted {
                unit,
                model,
                candidates,
                tokens_used,
                ..
            } => {
                assert_eq!(unit, "urgent");
                assert_eq!(model.as_deref(), Some("gemini"));
                assert_eq!(candidates, 3);
                assert_eq!(tokens_used, 420);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_type_name() {
        assert_eq!(CopyEvent::unit_started("emotional", "claude", 3).event_type(), "UnitStarted");
        assert_eq!(
            CopyEvent::fallback_triggered("emotional", "claude", "gpt").event_type(),
            "FallbackTriggered"
        );
        assert_eq!(CopyEvent::duplicate_dropped("gpt", 0.9).event_type(), "DuplicateDropped");
    }

    #[test]
    fn test_event_has_timestamp() {
        let before = SystemTime::now();
        let event = CopyEvent::unit_started("direct", "gpt", 2);
        let after = SystemTime::now();

        let ts = event.timestamp();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    // ==========================================
    // Serialization Tests
    // ==========================================

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = CopyEvent::candidate_rejected("gpt", Some(Variety::DataDriven), 212, true);
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains(r#""type":"CandidateRejected""#));
        assert!(json.contains(r#""variety":"data-driven""#));
        assert!(json.contains(r#""tolerated":true"#));
    }

    #[test]
    fn test_exhausted_unit_skips_model() {
        let event = CopyEvent::unit_completed("urgent", None, 0, 0, 0.0, 5);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"model\""));
    }

    #[test]
    fn test_event_deserializes_from_json() {
        let json = r#"{
            "type": "RerankCompleted",
            "judge_model": "claude",
            "candidates": 12,
            "selected": 5,
            "degraded": false,
            "timestamp": 1704067200000
        }"#;

        match serde_json::from_str::<CopyEvent>(json).unwrap() {
            CopyEvent::RerankCompleted { selected, degraded, .. } => {
                assert_eq!(selected, 5);
                assert!(!degraded);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_all_events_serialize_roundtrip() {
        let events = vec![
            CopyEvent::unit_started("premium", "claude", 2),
            CopyEvent::attempt_failed("premium", "claude", "timeout", true, 0),
            CopyEvent::fallback_triggered("premium", "claude", "gpt"),
            CopyEvent::unit_completed("premium", Some("gpt"), 2, 150, 0.001, 900),
            CopyEvent::candidate_rejected("gpt", None, 10, false),
            CopyEvent::duplicate_dropped("gpt", 0.92),
            CopyEvent::rerank_completed("claude", 8, 5, true),
            CopyEvent::orchestration_completed("variety", 5, 1200, 0.01, 3000),
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let parsed: CopyEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event.event_type(), parsed.event_type());
        }
    }
}
