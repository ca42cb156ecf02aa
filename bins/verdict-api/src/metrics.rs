// Prometheus metrics for the Verdict API

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Process-wide registry served on /metrics
    pub static ref REGISTRY: Registry = Registry::new();
}

#[derive(Clone)]
pub struct Metrics {
    pub evaluations_submitted: IntCounter,
    pub compilations_submitted: IntCounter,
    /// Rejected requests by route
    pub requests_rejected: IntCounterVec,
}

impl Metrics {
    /// Create the counters and register them with [`REGISTRY`]
    pub fn register() -> prometheus::Result<Self> {
        let evaluations_submitted = IntCounter::new(
            "verdict_evaluations_submitted_total",
            "Evaluation jobs queued",
        )?;
        let compilations_submitted = IntCounter::new(
            "verdict_compilations_submitted_total",
            "Compile jobs queued",
        )?;
        let requests_rejected = IntCounterVec::new(
            Opts::new("verdict_requests_rejected_total", "Requests rejected before queueing"),
            &["route"],
        )?;

        REGISTRY.register(Box::new(evaluations_submitted.clone()))?;
        REGISTRY.register(Box::new(compilations_submitted.clone()))?;
        REGISTRY.register(Box::new(requests_rejected.clone()))?;

        Ok(Self {
            evaluations_submitted,
            compilations_submitted,
            requests_rejected,
        })
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| format!("Metrics are not UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_render() {
        let metrics = Metrics::register().unwrap();
        metrics.evaluations_submitted.inc();
        metrics.requests_rejected.with_label_values(&["evaluate"]).inc();

        let text = render().unwrap();
        assert!(text.contains("verdict_evaluations_submitted_total 1"));
        assert!(text.contains("verdict_requests_rejected_total{route=\"evaluate\"} 1"));

        // Names are unique per registry
        assert!(Metrics::register().is_err());
    }
}
