//! Metrics Observer
//!
//! Prometheus-compatible counters and a latency histogram fed from the
//! event stream:
//! - Counters: units by model, failed attempts, fallbacks, filter and dedupe drops
//! - Histogram: unit latency
//! - Gauges: tokens and cost

use crate::events::{CopyEvent, EventBus};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Histogram bucket boundaries for unit latency (milliseconds)
pub const LATENCY_BUCKETS: [u64; 7] = [100, 500, 1000, 2500, 5000, 10000, 30000];

/// Metrics collected from pipeline events
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Completed units, by producing model ("none" for exhausted units)
    pub units_total: BTreeMap<String, u64>,
    /// Failed attempts, by model
    pub attempt_failures_total: BTreeMap<String, u64>,
    /// Attempts that hit the unit timeout
    pub timeouts_total: u64,
    /// Fallback hops
    pub fallbacks_total: u64,
    /// Candidates outside the strict band, by variety ("none" in ensemble mode)
    pub length_misses_total: BTreeMap<String, u64>,
    /// Of those, kept via the tolerance band
    pub tolerated_total: u64,
    pub duplicates_total: u64,
    pub reranks_total: u64,
    pub rerank_degraded_total: u64,
    pub orchestrations_total: u64,
    pub copies_total: u64,
    /// Unit latency histogram (bucket -> count)
    pub latency_histogram: BTreeMap<u64, u64>,
    pub latency_sum_ms: u64,
    pub latency_count: u64,
    pub tokens_total: u64,
    pub total_cost_usd: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
        *map.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn record_latency(&mut self, latency_ms: u64) {
        let last = LATENCY_BUCKETS[LATENCY_BUCKETS.len() - 1];
        let bucket = LATENCY_BUCKETS
            .iter()
            .copied()
            .find(|&b| latency_ms <= b)
            .unwrap_or(last);
        *self.latency_histogram.entry(bucket).or_insert(0) += 1;

        self.latency_sum_ms += latency_ms;
        self.latency_count += 1;
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_count == 0 {
            0.0
        } else {
            self.latency_sum_ms as f64 / self.latency_count as f64
        }
    }

    /// Share of units that produced nothing
    pub fn exhaustion_rate(&self) -> f64 {
        let total: u64 = self.units_total.values().sum();
        if total == 0 {
            return 0.0;
        }
        self.units_total.get("none").copied().unwrap_or(0) as f64 / total as f64
    }

    /// Update from a single event
    pub fn record(&mut self, event: &CopyEvent) {
        match event {
            CopyEvent::UnitStarted { .. } => {}

            CopyEvent::AttemptFailed { model, timed_out, .. } => {
                Self::bump(&mut self.attempt_failures_total, model);
                if *timed_out {
                    self.timeouts_total += 1;
                }
            }

            CopyEvent::FallbackTriggered { .. } => self.fallbacks_total += 1,

            CopyEvent::UnitCompleted {
                model,
                latency_ms,
                ..
            } => {
                Self::bump(&mut self.units_total, model.as_deref().unwrap_or("none"));
                self.record_latency(*latency_ms);
            }

            CopyEvent::CandidateRejected { variety, tolerated, .. } => {
                let key = variety.map(|v| v.as_str()).unwrap_or("none");
                Self::bump(&mut self.length_misses_total, key);
                if *tolerated {
                    self.tolerated_total += 1;
                }
            }

            CopyEvent::DuplicateDropped { .. } => self.duplicates_total += 1,

            CopyEvent::RerankCompleted { degraded, .. } => {
                self.reranks_total += 1;
                if *degraded {
                    self.rerank_degraded_total += 1;
                }
            }

            CopyEvent::OrchestrationCompleted {
                copies,
                total_tokens,
                total_cost,
                ..
            } => {
                self.orchestrations_total += 1;
                self.copies_total += *copies as u64;
                self.tokens_total += *total_tokens as u64;
                self.total_cost_usd += total_cost;
            }
        }
    }

    /// Format metrics as Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        let mut labelled = |name: &str, help: &str, label: &str, map: &BTreeMap<String, u64>| {
            output.push_str(&format!("# HELP {} {}\n# TYPE {} counter\n", name, help, name));
            for (key, count) in map {
                output.push_str(&format!("{}{{{}=\"{}\"}} {}\n", name, label, key, count));
            }
        };
        labelled("varietal_units_total", "Completed units of work", "model", &self.units_total);
        labelled(
            "varietal_attempt_failures_total",
            "Failed provider attempts",
            "model",
            &self.attempt_failures_total,
        );
        labelled(
            "varietal_length_misses_total",
            "Candidates outside the length band",
            "variety",
            &self.length_misses_total,
        );

        for (name, help, value) in [
            ("varietal_timeouts_total", "Attempts that hit the unit timeout", self.timeouts_total),
            ("varietal_fallbacks_total", "Fallback hops", self.fallbacks_total),
            ("varietal_tolerated_total", "Candidates kept via tolerance", self.tolerated_total),
            ("varietal_duplicates_total", "Near-duplicates dropped", self.duplicates_total),
            ("varietal_reranks_total", "Judge reranks attempted", self.reranks_total),
            (
                "varietal_rerank_degraded_total",
                "Reranks that fell back",
                self.rerank_degraded_total,
            ),
            ("varietal_orchestrations_total", "Orchestration calls", self.orchestrations_total),
            ("varietal_copies_total", "Copies returned", self.copies_total),
            ("varietal_tokens_total", "Tokens consumed", self.tokens_total),
        ] {
            output.push_str(&format!(
                "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
                name, help, name, name, value
            ));
        }

        output.push_str("# HELP varietal_unit_latency_ms Unit latency in milliseconds\n");
        output.push_str("# TYPE varietal_unit_latency_ms histogram\n");
        let mut cumulative = 0u64;
        for &bucket in &LATENCY_BUCKETS {
            cumulative += self.latency_histogram.get(&bucket).copied().unwrap_or(0);
            output.push_str(&format!(
                "varietal_unit_latency_ms_bucket{{le=\"{}\"}} {}\n",
                bucket, cumulative
            ));
        }
        output.push_str(&format!(
            "varietal_unit_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
            self.latency_count
        ));
        output.push_str(&format!("varietal_unit_latency_ms_sum {}\n", self.latency_sum_ms));
        output.push_str(&format!("varietal_unit_latency_ms_count {}\n", self.latency_count));

        output.push_str("# HELP varietal_cost_usd_total Total cost in USD\n");
        output.push_str("# TYPE varietal_cost_usd_total gauge\n");
        output.push_str(&format!("varietal_cost_usd_total {}\n", self.total_cost_usd));

        output
    }

    /// Human-readable report
    pub fn report(&self) -> String {
        let mut output = String::new();

        output.push_str("=== Generation Metrics Report ===\n\n");

        output.push_str("Units by Model:\n");
        for (model, count) in &self.units_total {
            output.push_str(&format!("  {}: {}\n", model, count));
        }

        output.push_str("\nFailed Attempts:\n");
        for (model, count) in &self.attempt_failures_total {
            output.push_str(&format!("  {}: {}\n", model, count));
        }

        output.push_str(&format!(
            "\nFallbacks: {}, timeouts: {}, exhaustion rate: {:.1}%\n",
            self.fallbacks_total,
            self.timeouts_total,
            self.exhaustion_rate() * 100.0
        ));
        output.push_str(&format!(
            "Filter: {} out of band ({} tolerated), duplicates: {}\n",
            self.length_misses_total.values().sum::<u64>(),
            self.tolerated_total,
            self.duplicates_total
        ));
        output.push_str(&format!(
            "Latency: avg={:.1}ms, count={}\n",
            self.avg_latency_ms(),
            self.latency_count
        ));
        output.push_str(&format!(
            "Cost: total=${:.4}, tokens={}, copies={}\n",
            self.total_cost_usd, self.tokens_total, self.copies_total
        ));

        output
    }
}

/// Observer that collects metrics from pipeline events
pub struct MetricsObserver {
    receiver: broadcast::Receiver<CopyEvent>,
    metrics: Arc<Mutex<Metrics>>,
}

impl MetricsObserver {
    pub fn new(bus: &EventBus) -> Self {
        Self {
            receiver: bus.subscribe(),
            metrics: Arc::new(Mutex::new(Metrics::new())),
        }
    }

    /// Handle for reading the metrics while the observer runs
    pub fn metrics(&self) -> Arc<Mutex<Metrics>> {
        Arc::clone(&self.metrics)
    }

    /// Collect metrics until the channel closes
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if let Ok(mut metrics) = self.metrics.lock() {
                        metrics.record(&event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }
}
