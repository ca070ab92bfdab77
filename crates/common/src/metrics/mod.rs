//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions for
//! each pipeline stage.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all LexForge metrics
pub const METRICS_PREFIX: &str = "lexforge";

/// Buckets for whole-request and generation latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Buckets for index and embedding calls (typically faster)
pub const SEARCH_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        Unit::Count,
        "Answer requests by planning strategy and outcome"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline stage latency in seconds"
    );

    describe_counter!(
        format!("{}_subqueries_total", METRICS_PREFIX),
        Unit::Count,
        "Fragment index queries issued, by mode and status"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Fragment index query latency in seconds"
    );

    describe_counter!(
        format!("{}_hydration_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Fragments dropped because their metadata could not be completed"
    );

    describe_counter!(
        format!("{}_citation_mismatches_total", METRICS_PREFIX),
        Unit::Count,
        "Generated citation markers that matched no supplied fragment"
    );

    describe_counter!(
        format!("{}_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "Model tokens consumed, by purpose"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Record one finished answer request
pub fn record_answer(strategy: &str, outcome: &str) {
    counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the duration of a pipeline stage
pub fn record_stage(stage: &'static str, duration_secs: f64) {
    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage
    )
    .record(duration_secs);
}

/// Record a single fragment index query
pub fn record_search(duration_secs: f64, mode: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_subqueries_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .record(duration_secs);
}

pub fn record_hydration_failures(count: usize) {
    if count > 0 {
        counter!(format!("{}_hydration_failures_total", METRICS_PREFIX)).increment(count as u64);
    }
}

pub fn record_citation_mismatches(count: usize) {
    if count > 0 {
        counter!(format!("{}_citation_mismatches_total", METRICS_PREFIX)).increment(count as u64);
    }
}

/// Record token usage; `purpose` is "planning" or "generation"
pub fn record_tokens(purpose: &'static str, prompt_tokens: u64, completion_tokens: u64) {
    counter!(
        format!("{}_tokens_total", METRICS_PREFIX),
        "purpose" => purpose,
        "kind" => "prompt"
    )
    .increment(prompt_tokens);

    counter!(
        format!("{}_tokens_total", METRICS_PREFIX),
        "purpose" => purpose,
        "kind" => "completion"
    )
    .increment(completion_tokens);
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
