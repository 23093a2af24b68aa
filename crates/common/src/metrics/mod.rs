//! Metrics and observability utilities
//!
//! Prometheus-style metric names under a single prefix; the gateway
//! installs the exporter, the library only records.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ManualQA metrics
pub const METRICS_PREFIX: &str = "manualqa";

/// Histogram buckets for pipeline stage latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s - generation
];

/// Register all metric descriptions
pub fn register_metrics() {
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

    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Answered or refused queries, by outcome"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query latency in seconds"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Latency of one pipeline stage (recall, traversal, generation, gate)"
    );

    describe_histogram!(
        format!("{}_bundle_units", METRICS_PREFIX),
        Unit::Count,
        "Evidence units per bundle, by kind"
    );

    describe_counter!(
        format!("{}_gate_verdicts_total", METRICS_PREFIX),
        Unit::Count,
        "Confidence gate verdicts"
    );

    describe_counter!(
        format!("{}_subsearch_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Index searches that failed or timed out"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Query embedding latency in seconds"
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

/// Record a finished query; `outcome` is "answered" or a refusal reason
pub fn record_query(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_query_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

pub fn record_stage(stage: &'static str, duration_secs: f64) {
    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage
    )
    .record(duration_secs);
}

pub fn record_bundle(facts: usize, summaries: usize, relations: usize) {
    for (kind, count) in [("fact", facts), ("summary", summaries), ("relation", relations)] {
        histogram!(
            format!("{}_bundle_units", METRICS_PREFIX),
            "kind" => kind
        )
        .record(count as f64);
    }
}

pub fn record_verdict(passed: bool, attempt: u32) {
    let verdict = if passed { "passed" } else { "failed" };
    counter!(
        format!("{}_gate_verdicts_total", METRICS_PREFIX),
        "verdict" => verdict,
        "attempt" => attempt.to_string()
    )
    .increment(1);
}

pub fn record_subsearch_failure(index: &str, reason: &'static str) {
    counter!(
        format!("{}_subsearch_failures_total", METRICS_PREFIX),
        "index" => index.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op
        let metrics = RequestMetrics::start("POST", "/v1/answer");
        metrics.finish(200);
        record_query(0.1, "answered");
        record_verdict(false, 1);
        record_bundle(3, 1, 2);
    }
}
