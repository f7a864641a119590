//! Backoff for transient provider failures
//!
//! Rate limits, network errors, timeouts and 5xx responses are retried
//! inside one attempt of a fallback chain. Everything else (spent quota,
//! unparseable output, missing credentials) is returned at once so the
//! coordinator can move to the next model.

use crate::llm::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Fractional part of the golden ratio; spreads jitter evenly across retries
const GOLDEN_FRACTION: f64 = 0.618_033_988_749_895;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Extra calls after the first one
    pub max_retries: usize,
    pub base_delay: Duration,
    /// Cap applied before jitter
    pub max_delay: Duration,
    /// Up to this fraction is added on top of the capped delay
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500), Duration::from_secs(8), 0.25)
    }
}

impl RetryConfig {
    pub fn new(
        max_retries: usize,
        base_delay: Duration,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Wait before retry number `retry` (0-based)
    pub fn backoff(&self, retry: usize) -> Duration {
        let factor = u32::try_from(retry)
            .ok()
            .and_then(|r| 2u32.checked_pow(r))
            .unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay));

        let spread = (retry as f64 * GOLDEN_FRACTION).fract() * self.jitter_factor;
        capped.mul_f64(1.0 + spread)
    }

    /// Server hint wins over computed backoff
    fn delay_for(&self, retry: usize, error: &ProviderError) -> Duration {
        match error {
            ProviderError::RateLimited {
                retry_after: Some(hint),
            } => *hint,
            _ => self.backoff(retry),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of retries
pub async fn call_with_retry<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut retry = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() || retry >= config.max_retries => return Err(err),
            Err(err) => err,
        };

        let delay = config.delay_for(retry, &err);
        debug!(
            retry = retry + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying provider call"
        );
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quick(max_retries: usize) -> RetryConfig {
        RetryConfig::new(max_retries, Duration::from_millis(1), Duration::from_millis(10), 0.0)
    }

    /// Operation failing with `error` for the first `failures` calls
    fn flaky(
        calls: &Arc<AtomicUsize>,
        failures: usize,
        error: ProviderError,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str, ProviderError>> {
        let calls = calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures { Err(error.clone()) } else { Ok("copy") })
        }
    }

    // ==========================================
    // Backoff
    // ==========================================

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = RetryConfig::new(5, Duration::from_secs(1), Duration::from_secs(10), 0.0);
        let delays: Vec<u64> = (0..6).map(|r| config.backoff(r).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(config.backoff(500), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_is_bounded_and_deterministic() {
        let config = RetryConfig::new(3, Duration::from_secs(1), Duration::from_secs(1), 0.5);
        for retry in 0..10 {
            let d = config.backoff(retry);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_millis(1500));
            assert_eq!(d, config.backoff(retry));
        }
    }

    #[test]
    fn test_jitter_factor_clamped() {
        let config = RetryConfig::new(1, Duration::from_secs(1), Duration::from_secs(10), 2.0);
        assert_eq!(config.jitter_factor, 1.0);
    }

    #[test]
    fn test_retry_after_hint_wins() {
        let config = RetryConfig::default();
        let limited = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(config.delay_for(0, &limited), Duration::from_secs(30));
        assert_eq!(config.delay_for(0, &ProviderError::Timeout), config.backoff(0));
    }

    // ==========================================
    // call_with_retry
    // ==========================================

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = flaky(&calls, 2, ProviderError::Network("reset".into()));

        assert_eq!(call_with_retry(op, &quick(3)).await.unwrap(), "copy");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = flaky(&calls, usize::MAX, ProviderError::Timeout);

        assert_eq!(call_with_retry(op, &quick(2)).await.unwrap_err(), ProviderError::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_spent_quota_fails_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = flaky(&calls, usize::MAX, ProviderError::QuotaExhausted { keys: 3 });

        let result = call_with_retry(op, &quick(5)).await;
        assert!(matches!(result, Err(ProviderError::QuotaExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_makes_single_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = flaky(&calls, usize::MAX, ProviderError::Timeout);

        let _ = call_with_retry(op, &RetryConfig::disabled()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_hint() {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = flaky(
            &calls,
            1,
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(3)),
            },
        );
        let config = RetryConfig::new(2, Duration::from_secs(10), Duration::from_secs(60), 0.0);

        let start = tokio::time::Instant::now();
        assert_eq!(call_with_retry(op, &config).await.unwrap(), "copy");

        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(3));
        assert!(waited < Duration::from_secs(10));
    }
}
