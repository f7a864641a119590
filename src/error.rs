//! Surface errors for the orchestration entry point.
//!
//! Only configuration-level failures reach the caller. Everything that goes
//! wrong inside a unit of work (network, quota, timeouts, malformed output)
//! is absorbed by the fallback chain and shows up as a smaller result set.

use thiserror::Error;

/// Errors returned by [`Orchestrator::orchestrate`](crate::core::Orchestrator::orchestrate)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    /// No provider anywhere in the priority list has credentials
    #[error("no provider is configured (checked: {checked})")]
    NoProviderConfigured {
        /// Comma-separated list of provider names that were checked
        checked: String,
    },

    /// The request violates a structural invariant
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl OrchestrationError {
    /// Build a `NoProviderConfigured` from the names that were tried
    pub fn no_provider<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let checked = names.into_iter().collect::<Vec<_>>().join(", ");
        Self::NoProviderConfigured {
            checked: if checked.is_empty() {
                "<none registered>".to_string()
            } else {
                checked
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_provider_lists_checked_names() {
        let err = OrchestrationError::no_provider(["claude", "gpt"]);
        assert_eq!(
            err.to_string(),
            "no provider is configured (checked: claude, gpt)"
        );
    }

    #[test]
    fn test_no_provider_with_empty_registry() {
        let err = OrchestrationError::no_provider(std::iter::empty());
        assert!(err.to_string().contains("<none registered>"));
    }

    #[test]
    fn test_invalid_request_display() {
        let err = OrchestrationError::InvalidRequest("count must be >= 1".to_string());
        assert_eq!(err.to_string(), "invalid request: count must be >= 1");
    }
}
