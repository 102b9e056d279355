//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all RevForge metrics
pub const METRICS_PREFIX: &str = "revforge";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 150ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms - P50 target
    0.075, // 75ms
    0.100, // 100ms
    0.150, // 150ms - P99 target
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
];

/// Buckets for workflow stage duration (external fetches dominate)
pub const STAGE_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    15.00,  // 15s
    30.00,  // 30s
    60.00,  // 1m
    300.0,  // 5m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Workflow metrics
    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "PRISMA stage execution duration in seconds"
    );

    describe_counter!(
        format!("{}_stage_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Total PRISMA stage transitions"
    );

    describe_counter!(
        format!("{}_records_identified_total", METRICS_PREFIX),
        Unit::Count,
        "Total study records identified across sources"
    );

    describe_counter!(
        format!("{}_duplicates_removed_total", METRICS_PREFIX),
        Unit::Count,
        "Total duplicate records removed"
    );

    describe_counter!(
        format!("{}_screening_decisions_total", METRICS_PREFIX),
        Unit::Count,
        "Total screening decisions recorded"
    );

    // Source metrics
    describe_counter!(
        format!("{}_source_fetches_total", METRICS_PREFIX),
        Unit::Count,
        "Total external source fetches"
    );

    describe_counter!(
        format!("{}_source_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Total external source failures after retries"
    );

    // Database metrics
    describe_gauge!(
        format!("{}_db_connections_active", METRICS_PREFIX),
        Unit::Count,
        "Active database connections"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a completed stage execution
pub fn record_stage(stage: &str, duration_secs: f64) {
    counter!(
        format!("{}_stage_transitions_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a source fetch outcome
pub fn record_source_fetch(source: &str, success: bool, records: usize) {
    counter!(
        format!("{}_source_fetches_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "status" => if success { "ok" } else { "failed" }
    )
    .increment(1);

    if success {
        counter!(
            format!("{}_records_identified_total", METRICS_PREFIX),
            "source" => source.to_string()
        )
        .increment(records as u64);
    } else {
        counter!(
            format!("{}_source_failures_total", METRICS_PREFIX),
            "source" => source.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a screening decision
pub fn record_screening_decision(stage: &str, actor: &str, decision: &str) {
    counter!(
        format!("{}_screening_decisions_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "actor" => actor.to_string(),
        "decision" => decision.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted and contain SLO targets
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        assert!(LATENCY_BUCKETS.contains(&0.050));
        assert!(LATENCY_BUCKETS.contains(&0.150));
    }

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("GET", "/v1/tasks");
        std::thread::sleep(std::time::Duration::from_millis(10));
        metrics.finish(200);
        // Just verify it runs without panic
    }
}
